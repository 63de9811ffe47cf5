//! EBPSM: budget-driven scheduling
//!
//! Preprocessing orders tasks into the Estimated Execution Order Queue
//! (DAG level, then EFT) and distributes the workflow budget with FFTD:
//! each task in turn gets the price of the fastest VM type it can afford.
//! Budgets are rebalanced after every task completion.

use std::collections::HashMap;

use crate::config::SimulationConfig;
use crate::cost::{calculate_price_for_vm, estimate_price_for_vm_type};
use crate::error::{SimResult, SimulatorError};
use crate::event::{EventKind, EventType};
use crate::predict::{execution_time, PredictModel};
use crate::scheduler::{
    dispatch_task_on_vm, enqueue_entry_tasks, enqueue_ready_children, may_rearm,
    provision_fresh_vm, Scheduler, SimContext,
};
use crate::storage::Storage;
use crate::vm::{VmId, VmManager};
use crate::workflow::{Task, TaskId, TaskState, Workflow, WorkflowId};

/// Tunables of the EBPSM policy
#[derive(Debug, Clone, Copy)]
pub struct EbpsmSettings {
    /// Period of the resource-management hook, in seconds
    pub provisioning_interval_s: f64,
}

impl Default for EbpsmSettings {
    fn default() -> Self {
        Self {
            provisioning_interval_s: 1.0,
        }
    }
}

/// Per-task fields derived during preprocessing and scheduling
#[derive(Debug, Clone, Copy, Default)]
struct TaskBudget {
    /// Earliest finish time on the slowest type, relative to submission
    eft: f64,
    /// Execution prediction backing the EFT
    exec_prediction: f64,
    /// Dollars allocated to this task
    budget: f64,
    /// Dollars actually billed when the task was placed
    realized_price: f64,
}

/// EBPSM view of a workflow: the core instance plus budget bookkeeping
struct EbpsmWorkflow {
    core: Workflow,
    info: Vec<TaskBudget>,
    /// Tasks grouped by DAG level (shortest distance from any root)
    levels: Vec<Vec<TaskId>>,
    /// Estimated Execution Order Queue
    eeoq: Vec<TaskId>,
    /// Budget left over after distribution
    spare_budget: f64,
}

/// Budget-constrained scheduler
pub struct EbpsmScheduler {
    workflows: HashMap<WorkflowId, EbpsmWorkflow>,
    settings: EbpsmSettings,
    config: SimulationConfig,
}

impl EbpsmScheduler {
    /// Create a scheduler with default settings
    pub fn new() -> Self {
        Self {
            workflows: HashMap::new(),
            settings: EbpsmSettings::default(),
            config: SimulationConfig::default(),
        }
    }
}

impl Default for EbpsmScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// DAG levels as the shortest distance from any root.
///
/// Tasks are in topological order, so a single pass over parents suffices.
fn allocate_levels(workflow: &Workflow) -> Vec<Vec<TaskId>> {
    let mut level = vec![0usize; workflow.tasks.len()];
    let mut levels: Vec<Vec<TaskId>> = Vec::new();
    for task in &workflow.tasks {
        let l = task
            .parents
            .iter()
            .map(|&p| level[p] + 1)
            .min()
            .unwrap_or(0);
        level[task.id] = l;
        if levels.len() <= l {
            levels.resize(l + 1, Vec::new());
        }
        levels[l].push(task.id);
    }
    levels
}

/// Fastest (most expensive first) type whose single-run price fits `budget`
fn fastest_type_within(
    vms: &VmManager,
    task: &Task,
    storage: Storage,
    model: PredictModel,
    container_prov_s: f64,
    vm_prov_s: f64,
    budget: f64,
) -> Option<(usize, f64, f64)> {
    for idx in (0..vms.catalog().len()).rev() {
        let ty = &vms.catalog()[idx];
        let exec = execution_time(model, task, ty, storage, None, container_prov_s, vm_prov_s);
        let price = estimate_price_for_vm_type(exec, ty);
        if price <= budget {
            return Some((idx, exec, price));
        }
    }
    None
}

/// FFTD budget distribution over `order`; returns the leftover spare budget.
///
/// Each task gets the single-run price of the fastest type it can afford.
/// When nothing is affordable the task absorbs the residual and every later
/// task gets zero.
fn distribute_budget(
    vms: &VmManager,
    storage: Storage,
    model: PredictModel,
    vm_prov_s: f64,
    wf: &mut EbpsmWorkflow,
    order: &[TaskId],
    mut budget: f64,
) -> f64 {
    let container_prov = wf.core.container.provision_secs();
    for (pos, &task_id) in order.iter().enumerate() {
        let task = &wf.core.tasks[task_id];
        match fastest_type_within(vms, task, storage, model, container_prov, vm_prov_s, budget) {
            Some((_, exec, price)) => {
                wf.info[task_id].budget = price;
                wf.info[task_id].exec_prediction = exec;
                budget -= price;
            }
            None => {
                wf.info[task_id].budget = budget;
                budget = 0.0;
                for &rest in &order[pos + 1..] {
                    wf.info[rest].budget = 0.0;
                }
                break;
            }
        }
    }
    budget
}

impl Scheduler for EbpsmScheduler {
    fn name(&self) -> &'static str {
        "EBPSM"
    }

    fn configure(&mut self, config: &SimulationConfig) {
        self.config = config.clone();
    }

    fn submit_workflow(&mut self, ctx: &mut SimContext<'_>, workflow: Workflow) -> SimResult<()> {
        let now = ctx.now();
        let workflow_id = workflow.id;
        let budget = workflow.budget().ok_or_else(|| {
            SimulatorError::Config("EBPSM requires a budget-constrained workflow".to_string())
        })?;
        let container_prov = workflow.container.provision_secs();
        let vm_prov = self.config.vm_provision_delay_s;
        let model = self.config.predict_model;

        let levels = allocate_levels(&workflow);

        // EFTs on the slowest type give the pessimistic ordering inside a level.
        let mut info = vec![TaskBudget::default(); workflow.tasks.len()];
        let slowest = ctx.vms.slowest_vm_type().clone();
        for task in &workflow.tasks {
            let exec = execution_time(
                model,
                task,
                &slowest,
                ctx.storage,
                None,
                container_prov,
                vm_prov,
            );
            let max_parent_eft = task
                .parents
                .iter()
                .map(|&p| info[p].eft)
                .fold(0.0f64, f64::max);
            info[task.id].eft = max_parent_eft + exec;
            info[task.id].exec_prediction = exec;
        }

        // EEOQ: levels ascending, EFT ascending within a level.
        let mut eeoq = Vec::with_capacity(workflow.tasks.len());
        for level in &levels {
            let mut tasks = level.clone();
            tasks.sort_by(|&a, &b| info[a].eft.total_cmp(&info[b].eft).then(a.cmp(&b)));
            eeoq.extend(tasks);
        }

        let submit_time = workflow.submit_time;
        let mut wf = EbpsmWorkflow {
            core: workflow,
            info,
            levels,
            eeoq: eeoq.clone(),
            spare_budget: 0.0,
        };
        wf.spare_budget = distribute_budget(
            ctx.vms,
            ctx.storage,
            model,
            vm_prov,
            &mut wf,
            &eeoq,
            budget,
        );

        tracing::info!(
            workflow = %workflow_id,
            name = %wf.core.name,
            budget,
            spare_budget = wf.spare_budget,
            "accepted workflow"
        );

        self.workflows.insert(workflow_id, wf);

        ctx.queue
            .push(submit_time, EventKind::ScheduleWorkflow { workflow_id });
        ctx.queue.push(
            now + self.settings.provisioning_interval_s,
            EventKind::ManageResources,
        );
        Ok(())
    }

    fn schedule_workflow(
        &mut self,
        ctx: &mut SimContext<'_>,
        workflow_id: WorkflowId,
    ) -> SimResult<()> {
        let wf = self
            .workflows
            .get_mut(&workflow_id)
            .ok_or(SimulatorError::WorkflowNotFound(workflow_id))?;
        enqueue_entry_tasks(ctx, &mut wf.core)
    }

    fn schedule_task(
        &mut self,
        ctx: &mut SimContext<'_>,
        workflow_id: WorkflowId,
        task_id: TaskId,
    ) -> SimResult<()> {
        let vm_prov = self.config.vm_provision_delay_s;
        let model = self.config.predict_model;
        let wf = self
            .workflows
            .get_mut(&workflow_id)
            .ok_or(SimulatorError::WorkflowNotFound(workflow_id))?;
        let now = ctx.now();
        wf.core.task(task_id)?;
        let budget = wf.info[task_id].budget;
        let container_prov = wf.core.container.provision_secs();

        // Fastest idle VM whose incremental price fits the task budget.
        let mut best: Option<(VmId, f64, f64)> = None;
        {
            let task = wf.core.task(task_id)?;
            for vm_id in ctx.vms.idle_vms() {
                let vm = ctx.vms.vm(vm_id)?;
                let exec = execution_time(
                    model,
                    task,
                    &vm.vm_type,
                    ctx.storage,
                    Some(vm),
                    container_prov,
                    vm_prov,
                );
                let price = calculate_price_for_vm(now, exec, vm)?;
                if price <= budget && best.map_or(true, |(_, e, _)| exec < e) {
                    best = Some((vm_id, exec, price));
                }
            }
        }

        let (vm_id, exec, price) = match best {
            Some(found) => found,
            None => {
                // Lease the fastest affordable type, or fall back to the
                // slowest when nothing fits the budget.
                let task = wf.core.task(task_id)?;
                let (ty, exec, price) = match fastest_type_within(
                    ctx.vms,
                    task,
                    ctx.storage,
                    model,
                    container_prov,
                    vm_prov,
                    budget,
                ) {
                    Some((idx, exec, price)) => (ctx.vms.catalog()[idx].clone(), exec, price),
                    None => {
                        let ty = ctx.vms.slowest_vm_type().clone();
                        let exec = execution_time(
                            model,
                            task,
                            &ty,
                            ctx.storage,
                            None,
                            container_prov,
                            vm_prov,
                        );
                        let price = estimate_price_for_vm_type(exec, &ty);
                        tracing::warn!(
                            workflow = %workflow_id,
                            task = task_id,
                            budget,
                            price,
                            "no VM type affordable within task budget; using slowest"
                        );
                        (ty, exec, price)
                    }
                };
                let vm_id = provision_fresh_vm(ctx, workflow_id, &ty)?;
                (vm_id, exec, price)
            }
        };

        wf.info[task_id].realized_price = price;
        dispatch_task_on_vm(ctx, &mut wf.core, task_id, vm_id, exec, price)
    }

    fn finish_task(
        &mut self,
        ctx: &mut SimContext<'_>,
        workflow_id: WorkflowId,
        task_id: TaskId,
        vm_id: VmId,
    ) -> SimResult<()> {
        let vm_prov = self.config.vm_provision_delay_s;
        let model = self.config.predict_model;
        let wf = self
            .workflows
            .get_mut(&workflow_id)
            .ok_or(SimulatorError::WorkflowNotFound(workflow_id))?;
        let now = ctx.now();

        wf.core.task_mut(task_id)?.mark_finished(now)?;
        ctx.vms.release_vm(vm_id, now)?;

        // Rebalance: pool the unscheduled budgets, this task's surplus (or
        // debt), and the spare, then re-run FFTD over the unscheduled tail.
        let unscheduled: Vec<TaskId> = wf
            .eeoq
            .iter()
            .copied()
            .filter(|&id| wf.core.tasks[id].state == TaskState::Created)
            .collect();
        let unscheduled_budget: f64 = unscheduled.iter().map(|&id| wf.info[id].budget).sum();
        let pool = (unscheduled_budget + wf.info[task_id].budget + wf.spare_budget
            - wf.info[task_id].realized_price)
            .max(0.0);
        wf.spare_budget = distribute_budget(
            ctx.vms,
            ctx.storage,
            model,
            vm_prov,
            wf,
            &unscheduled,
            pool,
        );

        enqueue_ready_children(ctx, &mut wf.core, task_id)
    }

    fn manage_resources(
        &mut self,
        ctx: &mut SimContext<'_>,
        next_event: Option<EventType>,
    ) -> SimResult<()> {
        let now = ctx.now();
        for vm_id in ctx.vms.idle_vms() {
            let vm = ctx.vms.vm(vm_id)?;
            let threshold =
                self.config.deprovision_threshold_s(vm.vm_type.billing_period_s);
            let idle_time = match vm.idle_since() {
                Some(since) => now.duration_since(since),
                None => continue,
            };
            if idle_time > threshold {
                ctx.vms.shutdown_vm(now, vm_id, ctx.collector)?;
            }
        }
        if may_rearm(next_event) {
            let at = now + self.settings.provisioning_interval_s;
            ctx.queue.push(at, EventKind::ManageResources);
        }
        Ok(())
    }

    fn workflow(&self, workflow_id: WorkflowId) -> Option<&Workflow> {
        self.workflows.get(&workflow_id).map(|wf| &wf.core)
    }
}
