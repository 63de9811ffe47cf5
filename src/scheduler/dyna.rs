//! Dyna: A* search over per-task VM-type configurations
//!
//! Preprocessing searches the space of configuration plans (one VM type per
//! task) for the cheapest plan whose estimated makespan fits the deadline.
//! Placement then simply leases or reuses the planned type for each task.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::config::SimulationConfig;
use crate::cost::{calculate_price_for_vm, estimate_price_for_vm_type};
use crate::error::{SimResult, SimulatorError};
use crate::event::{EventKind, EventType};
use crate::predict::{execution_time, PredictModel};
use crate::scheduler::{
    dispatch_task_on_vm, enqueue_entry_tasks, enqueue_ready_children, provision_fresh_vm,
    shutdown_idle_near_boundary, Scheduler, SimContext,
};
use crate::storage::Storage;
use crate::time::SimTime;
use crate::vm::{VmId, VmType};
use crate::workflow::{TaskId, Workflow, WorkflowId};

/// Tunables of the Dyna policy
#[derive(Debug, Clone, Copy)]
pub struct DynaSettings {
    /// Iteration cap of the on-demand configuration search
    pub on_demand_conf_max_iter: usize,
}

impl Default for DynaSettings {
    fn default() -> Self {
        Self {
            on_demand_conf_max_iter: 1000,
        }
    }
}

/// A configuration plan: one catalog type index per task, plus its search
/// position and f metric
#[derive(Debug, Clone)]
struct PlanNode {
    /// Catalog type index per task id
    plan: Vec<usize>,
    /// One-based depth in the search tree; the next position to vary
    level: usize,
    /// Estimated plan cost
    f_metric: f64,
}

impl PartialEq for PlanNode {
    fn eq(&self, other: &Self) -> bool {
        self.f_metric == other.f_metric && self.plan == other.plan
    }
}

impl Eq for PlanNode {}

impl PartialOrd for PlanNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PlanNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.f_metric
            .total_cmp(&other.f_metric)
            .then_with(|| self.plan.cmp(&other.plan))
    }
}

/// Dyna view of a workflow: the core instance plus the selected plan
struct DynaWorkflow {
    core: Workflow,
    /// Catalog type index per task id
    plan: Vec<usize>,
}

/// Deadline-constrained scheduler with configuration search
pub struct DynaScheduler {
    workflows: HashMap<WorkflowId, DynaWorkflow>,
    settings: DynaSettings,
    config: SimulationConfig,
}

impl DynaScheduler {
    /// Create a scheduler with default settings
    pub fn new() -> Self {
        Self {
            workflows: HashMap::new(),
            settings: DynaSettings::default(),
            config: SimulationConfig::default(),
        }
    }
}

impl Default for DynaScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-task execution estimates under a plan; local to that plan
fn estimate_times(
    workflow: &Workflow,
    plan: &[usize],
    catalog: &[VmType],
    storage: Storage,
    model: PredictModel,
    vm_prov_s: f64,
) -> Vec<f64> {
    let container_prov = workflow.container.provision_secs();
    workflow
        .tasks
        .iter()
        .map(|task| {
            execution_time(
                model,
                task,
                &catalog[plan[task.id]],
                storage,
                None,
                container_prov,
                vm_prov_s,
            )
        })
        .collect()
}

/// Estimated plan cost: single-run price of every task on its planned type
fn estimate_cost(plan: &[usize], times: &[f64], catalog: &[VmType]) -> f64 {
    plan.iter()
        .zip(times)
        .map(|(&ty, &time)| estimate_price_for_vm_type(time, &catalog[ty]))
        .sum()
}

/// Estimated plan makespan: the longest path through the DAG under the
/// plan's per-task times
fn estimate_performance(workflow: &Workflow, times: &[f64]) -> f64 {
    let mut finish = vec![0.0f64; workflow.tasks.len()];
    let mut makespan = 0.0f64;
    for task in &workflow.tasks {
        let max_parent = task
            .parents
            .iter()
            .map(|&p| finish[p])
            .fold(0.0f64, f64::max);
        finish[task.id] = max_parent + times[task.id];
        makespan = makespan.max(finish[task.id]);
    }
    makespan
}

/// A*-like search for the cheapest deadline-feasible configuration plan.
///
/// Starts from the all-slowest plan and explores neighbors that upgrade one
/// position to a strictly faster type. Returns `None` when no feasible plan
/// was found within the iteration bound.
fn on_demand_configuration(
    workflow: &Workflow,
    deadline: SimTime,
    now: SimTime,
    catalog: &[VmType],
    storage: Storage,
    model: PredictModel,
    vm_prov_s: f64,
    max_iter: usize,
) -> Option<Vec<usize>> {
    let n_tasks = workflow.tasks.len();
    let n_types = catalog.len();

    let mut opened: BinaryHeap<Reverse<PlanNode>> = BinaryHeap::new();
    let mut closed: HashSet<Vec<usize>> = HashSet::new();
    let mut upper_bound: Option<f64> = None;
    let mut best_plan: Option<Vec<usize>> = None;

    let start = vec![0usize; n_tasks];
    let times = estimate_times(workflow, &start, catalog, storage, model, vm_prov_s);
    let cost = estimate_cost(&start, &times, catalog);
    opened.push(Reverse(PlanNode {
        plan: start,
        level: 0,
        f_metric: cost,
    }));

    let mut iterations = 0;
    while let Some(Reverse(node)) = opened.pop() {
        iterations += 1;
        if iterations > max_iter {
            break;
        }
        if closed.contains(&node.plan) {
            continue;
        }

        let times = estimate_times(workflow, &node.plan, catalog, storage, model, vm_prov_s);
        let perf = estimate_performance(workflow, &times);

        // Infeasible plans never become the incumbent.
        if now + perf <= deadline {
            let f = estimate_cost(&node.plan, &times, catalog);
            if upper_bound.map_or(true, |u| f < u) {
                upper_bound = Some(f);
                best_plan = Some(node.plan.clone());
            }
        }

        closed.insert(node.plan.clone());

        if node.level >= n_tasks {
            continue;
        }
        for ty in node.plan[node.level] + 1..n_types {
            let mut plan = node.plan.clone();
            plan[node.level] = ty;
            if closed.contains(&plan) {
                continue;
            }
            let times = estimate_times(workflow, &plan, catalog, storage, model, vm_prov_s);
            let f = estimate_cost(&plan, &times, catalog);
            if upper_bound.is_some_and(|u| f >= u) {
                continue;
            }
            opened.push(Reverse(PlanNode {
                plan,
                level: node.level + 1,
                f_metric: f,
            }));
        }
    }

    best_plan
}

impl Scheduler for DynaScheduler {
    fn name(&self) -> &'static str {
        "Dyna"
    }

    fn configure(&mut self, config: &SimulationConfig) {
        self.config = config.clone();
    }

    fn submit_workflow(&mut self, ctx: &mut SimContext<'_>, workflow: Workflow) -> SimResult<()> {
        let now = ctx.now();
        let workflow_id = workflow.id;
        let deadline = workflow.deadline().ok_or_else(|| {
            SimulatorError::Config("Dyna requires a deadline-constrained workflow".to_string())
        })?;

        let plan = on_demand_configuration(
            &workflow,
            deadline,
            now,
            ctx.vms.catalog(),
            ctx.storage,
            self.config.predict_model,
            self.config.vm_provision_delay_s,
            self.settings.on_demand_conf_max_iter,
        );

        let plan = match plan {
            Some(plan) => plan,
            None => {
                // No feasible plan within the bound: fall back to the
                // fastest type for every task.
                tracing::warn!(
                    workflow = %workflow_id,
                    name = %workflow.name,
                    "no feasible configuration plan; falling back to fastest type"
                );
                vec![ctx.vms.catalog().len() - 1; workflow.tasks.len()]
            }
        };

        tracing::info!(
            workflow = %workflow_id,
            name = %workflow.name,
            plan = ?plan,
            "accepted workflow"
        );

        let submit_time = workflow.submit_time;
        self.workflows.insert(
            workflow_id,
            DynaWorkflow {
                core: workflow,
                plan,
            },
        );

        ctx.queue
            .push(submit_time, EventKind::ScheduleWorkflow { workflow_id });
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
        let ty = ctx.vms.catalog()[wf.plan[task_id]].clone();
        let container_prov = wf.core.container.provision_secs();

        // Reuse an idle VM of the planned type when one exists.
        let mut reuse: Option<(VmId, f64, f64)> = None;
        {
            let task = wf.core.task(task_id)?;
            for vm_id in ctx.vms.idle_vms() {
                let vm = ctx.vms.vm(vm_id)?;
                if vm.vm_type.name != ty.name {
                    continue;
                }
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
                reuse = Some((vm_id, exec, price));
                break;
            }
        }

        let (vm_id, exec, price) = match reuse {
            Some(found) => found,
            None => {
                let task = wf.core.task(task_id)?;
                let exec =
                    execution_time(model, task, &ty, ctx.storage, None, container_prov, vm_prov);
                let price = estimate_price_for_vm_type(exec, &ty);
                let vm_id = provision_fresh_vm(ctx, workflow_id, &ty)?;
                (vm_id, exec, price)
            }
        };

        dispatch_task_on_vm(ctx, &mut wf.core, task_id, vm_id, exec, price)
    }

    fn finish_task(
        &mut self,
        ctx: &mut SimContext<'_>,
        workflow_id: WorkflowId,
        task_id: TaskId,
        vm_id: VmId,
    ) -> SimResult<()> {
        let wf = self
            .workflows
            .get_mut(&workflow_id)
            .ok_or(SimulatorError::WorkflowNotFound(workflow_id))?;
        let now = ctx.now();

        wf.core.task_mut(task_id)?.mark_finished(now)?;
        ctx.vms.release_vm(vm_id, now)?;

        // Dyna deprovisions inline after every completion instead of on a
        // periodic hook.
        shutdown_idle_near_boundary(ctx, self.config.vm_deprovision_percent)?;

        enqueue_ready_children(ctx, &mut wf.core, task_id)
    }

    fn manage_resources(
        &mut self,
        _ctx: &mut SimContext<'_>,
        _next_event: Option<EventType>,
    ) -> SimResult<()> {
        Ok(())
    }

    fn workflow(&self, workflow_id: WorkflowId) -> Option<&Workflow> {
        self.workflows.get(&workflow_id).map(|wf| &wf.core)
    }
}
