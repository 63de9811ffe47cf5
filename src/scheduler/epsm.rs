//! EPSM: deadline-driven scheduling
//!
//! Preprocessing picks the cheapest VM type whose predicted makespan fits
//! the workflow deadline, then turns the slack into per-task deadlines.
//! Placement prefers warm idle VMs (input files, then container, then any)
//! and only leases a new VM when postponing would break the task deadline.

use std::collections::HashMap;

use crate::config::SimulationConfig;
use crate::cost::{calculate_price_for_vm, estimate_price_for_vm_type};
use crate::error::{SimResult, SimulatorError};
use crate::event::{EventKind, EventType};
use crate::predict::{execution_time, PredictModel};
use crate::scheduler::{
    dispatch_task_on_vm, enqueue_entry_tasks, enqueue_ready_children, may_rearm,
    provision_fresh_vm, shutdown_idle_near_boundary, Scheduler, SimContext,
};
use crate::storage::Storage;
use crate::time::SimTime;
use crate::vm::{VmId, VmType};
use crate::workflow::{TaskId, TaskState, Workflow, WorkflowId};

/// Tunables of the EPSM policy
#[derive(Debug, Clone, Copy)]
pub struct EpsmSettings {
    /// Delay before a postponed task is considered again, in seconds
    pub scheduling_interval_s: f64,
    /// Period of the resource-management hook, in seconds
    pub provisioning_interval_s: f64,
}

impl Default for EpsmSettings {
    fn default() -> Self {
        Self {
            scheduling_interval_s: 10.0,
            provisioning_interval_s: 600.0,
        }
    }
}

/// Per-task fields derived during preprocessing
#[derive(Debug, Clone, Copy, Default)]
struct TaskPlan {
    /// Earliest finish time, absolute
    eft: SimTime,
    /// Predicted execution time on the selected type
    exec_prediction: f64,
    /// Share of the workflow spare time
    spare: f64,
    /// Per-task deadline
    deadline: SimTime,
}

/// EPSM view of a workflow: the core instance plus derived deadline data
struct EpsmWorkflow {
    core: Workflow,
    plans: Vec<TaskPlan>,
    makespan: f64,
    spare_time: f64,
    /// Catalog index of the type accepted during preprocessing
    selected_type: usize,
    deadline: SimTime,
}

/// Deadline-constrained scheduler
pub struct EpsmScheduler {
    workflows: HashMap<WorkflowId, EpsmWorkflow>,
    settings: EpsmSettings,
    config: SimulationConfig,
}

impl EpsmScheduler {
    /// Create a scheduler with default settings
    pub fn new() -> Self {
        Self {
            workflows: HashMap::new(),
            settings: EpsmSettings::default(),
            config: SimulationConfig::default(),
        }
    }

    fn workflow_mut(&mut self, workflow_id: WorkflowId) -> SimResult<&mut EpsmWorkflow> {
        self.workflows
            .get_mut(&workflow_id)
            .ok_or(SimulatorError::WorkflowNotFound(workflow_id))
    }
}

impl Default for EpsmScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// EFTs of every task on one type, relative to the submission time.
///
/// Returns per-task EFTs, per-task execution predictions, and the makespan.
fn compute_efts(
    workflow: &Workflow,
    ty: &VmType,
    storage: Storage,
    model: PredictModel,
    container_prov_s: f64,
    vm_prov_s: f64,
) -> (Vec<f64>, Vec<f64>, f64) {
    let n = workflow.tasks.len();
    let mut efts = vec![0.0; n];
    let mut execs = vec![0.0; n];
    let mut makespan = 0.0f64;

    for task in &workflow.tasks {
        let exec = execution_time(model, task, ty, storage, None, container_prov_s, vm_prov_s);
        let max_parent_eft = task
            .parents
            .iter()
            .map(|&p| efts[p])
            .fold(0.0f64, f64::max);
        efts[task.id] = max_parent_eft + exec;
        execs[task.id] = exec;
        makespan = makespan.max(efts[task.id]);
    }

    (efts, execs, makespan)
}

/// Recompute EFTs over non-finished tasks with base time `now` and re-derive
/// spare time and deadlines for unscheduled tasks
fn redistribute_spare_time(
    wf: &mut EpsmWorkflow,
    now: SimTime,
    ty: &VmType,
    storage: Storage,
    model: PredictModel,
    vm_prov_s: f64,
) {
    let container_prov_s = wf.core.container.provision_secs();
    let n = wf.core.tasks.len();
    let mut eft_abs = vec![now; n];
    let mut makespan = 0.0f64;

    for i in 0..n {
        let task = &wf.core.tasks[i];
        if task.is_finished() {
            eft_abs[i] = task.finish_time.unwrap_or(now);
            continue;
        }
        let exec = execution_time(model, task, ty, storage, None, container_prov_s, vm_prov_s);
        let base = task
            .parents
            .iter()
            .map(|&p| eft_abs[p])
            .max()
            .unwrap_or(now)
            .max(now);
        eft_abs[i] = base + exec;
        wf.plans[i].exec_prediction = exec;
        makespan = makespan.max(eft_abs[i].duration_since(now));
    }

    wf.makespan = makespan;
    wf.spare_time = wf.deadline.duration_since(now) - makespan;
    if makespan <= 0.0 {
        return;
    }

    for i in 0..n {
        if wf.core.tasks[i].state != TaskState::Created {
            continue;
        }
        let spare = wf.plans[i].exec_prediction / makespan * wf.spare_time;
        wf.plans[i].spare = spare;
        wf.plans[i].eft = eft_abs[i];
        wf.plans[i].deadline = eft_abs[i] + spare;
    }
}

impl Scheduler for EpsmScheduler {
    fn name(&self) -> &'static str {
        "EPSM"
    }

    fn configure(&mut self, config: &SimulationConfig) {
        self.config = config.clone();
    }

    fn submit_workflow(&mut self, ctx: &mut SimContext<'_>, workflow: Workflow) -> SimResult<()> {
        let now = ctx.now();
        let workflow_id = workflow.id;
        let deadline = workflow.deadline().ok_or_else(|| {
            SimulatorError::Config("EPSM requires a deadline-constrained workflow".to_string())
        })?;
        let container_prov = workflow.container.provision_secs();
        let vm_prov = self.config.vm_provision_delay_s;
        let model = self.config.predict_model;

        // Cheapest-first type scan; accept the first type whose makespan fits.
        let mut accepted = None;
        let mut last_makespan = 0.0;
        for (idx, ty) in ctx.vms.catalog().iter().enumerate() {
            let (efts, execs, makespan) =
                compute_efts(&workflow, ty, ctx.storage, model, container_prov, vm_prov);
            last_makespan = makespan;
            if now + makespan <= deadline {
                accepted = Some((idx, efts, execs, makespan));
                break;
            }
        }

        let Some((selected_type, efts, execs, makespan)) = accepted else {
            return Err(SimulatorError::InfeasibleDeadline {
                workflow_id,
                makespan_s: last_makespan,
                deadline,
            });
        };

        let spare_time = deadline.duration_since(now) - makespan;
        let plans = workflow
            .tasks
            .iter()
            .map(|task| {
                let spare = if makespan > 0.0 {
                    execs[task.id] / makespan * spare_time
                } else {
                    0.0
                };
                TaskPlan {
                    eft: now + efts[task.id],
                    exec_prediction: execs[task.id],
                    spare,
                    deadline: workflow.submit_time + efts[task.id] + spare,
                }
            })
            .collect();

        tracing::info!(
            workflow = %workflow_id,
            name = %workflow.name,
            vm_type = %ctx.vms.catalog()[selected_type].name,
            makespan,
            spare_time,
            "accepted workflow"
        );

        let submit_time = workflow.submit_time;
        self.workflows.insert(
            workflow_id,
            EpsmWorkflow {
                core: workflow,
                plans,
                makespan,
                spare_time,
                selected_type,
                deadline,
            },
        );

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
        let wf = self.workflow_mut(workflow_id)?;
        enqueue_entry_tasks(ctx, &mut wf.core)
    }

    fn schedule_task(
        &mut self,
        ctx: &mut SimContext<'_>,
        workflow_id: WorkflowId,
        task_id: TaskId,
    ) -> SimResult<()> {
        let settings = self.settings;
        let vm_prov = self.config.vm_provision_delay_s;
        let model = self.config.predict_model;
        let wf = self
            .workflows
            .get_mut(&workflow_id)
            .ok_or(SimulatorError::WorkflowNotFound(workflow_id))?;
        let now = ctx.now();
        wf.core.task(task_id)?;
        let task_deadline = wf.plans[task_id].deadline;
        let container_prov = wf.core.container.provision_secs();

        // Tiered reuse: input files on disk, then warm container, then any
        // idle VM. Within a tier, the cheapest feasible VM wins.
        let mut choice: Option<(VmId, f64, f64)> = None;
        {
            let task = wf.core.task(task_id)?;
            let tiers = [
                ctx.vms.idle_vms_for(Some(task), None),
                ctx.vms.idle_vms_for(None, Some(&task.container)),
                ctx.vms.idle_vms(),
            ];
            for tier in tiers {
                let mut best: Option<(VmId, f64, f64)> = None;
                for vm_id in tier {
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
                    if now + exec <= task_deadline {
                        let price = calculate_price_for_vm(now, exec, vm)?;
                        if best.map_or(true, |(_, _, p)| price < p) {
                            best = Some((vm_id, exec, price));
                        }
                    }
                }
                if best.is_some() {
                    choice = best;
                    break;
                }
            }
        }

        if let Some((vm_id, exec, price)) = choice {
            return dispatch_task_on_vm(ctx, &mut wf.core, task_id, vm_id, exec, price);
        }

        // No idle VM fits: the fallback lease is the cheapest type meeting
        // the task deadline, or the fastest type when none does.
        let (type_idx, new_exec) = {
            let task = wf.core.task(task_id)?;
            let mut found = None;
            for (idx, ty) in ctx.vms.catalog().iter().enumerate() {
                let exec =
                    execution_time(model, task, ty, ctx.storage, None, container_prov, vm_prov);
                if now + exec <= task_deadline {
                    found = Some((idx, exec));
                    break;
                }
            }
            found.unwrap_or_else(|| {
                let idx = ctx.vms.catalog().len() - 1;
                let ty = &ctx.vms.catalog()[idx];
                let exec =
                    execution_time(model, task, ty, ctx.storage, None, container_prov, vm_prov);
                (idx, exec)
            })
        };

        let time_left = task_deadline.duration_since(now);
        let must_lease = wf.core.task(task_id)?.is_root()
            || time_left - new_exec - settings.scheduling_interval_s <= 0.0;

        if must_lease {
            let ty = ctx.vms.catalog()[type_idx].clone();
            let vm_id = provision_fresh_vm(ctx, workflow_id, &ty)?;
            let price = estimate_price_for_vm_type(new_exec, &ty);
            dispatch_task_on_vm(ctx, &mut wf.core, task_id, vm_id, new_exec, price)
        } else {
            // Enough slack to wait for a busy VM to free up.
            ctx.queue.push(
                now + settings.scheduling_interval_s,
                EventKind::ScheduleTask {
                    workflow_id,
                    task_id,
                },
            );
            Ok(())
        }
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

        // Early or late against the per-task deadline: rebalance the slack of
        // everything still unscheduled.
        if now != wf.plans[task_id].deadline {
            let ty = ctx.vms.catalog()[wf.selected_type].clone();
            redistribute_spare_time(wf, now, &ty, ctx.storage, model, vm_prov);
        }

        enqueue_ready_children(ctx, &mut wf.core, task_id)
    }

    fn manage_resources(
        &mut self,
        ctx: &mut SimContext<'_>,
        next_event: Option<EventType>,
    ) -> SimResult<()> {
        shutdown_idle_near_boundary(ctx, self.config.vm_deprovision_percent)?;
        if may_rearm(next_event) {
            let at = ctx.now() + self.settings.provisioning_interval_s;
            ctx.queue.push(at, EventKind::ManageResources);
        }
        Ok(())
    }

    fn workflow(&self, workflow_id: WorkflowId) -> Option<&Workflow> {
        self.workflows.get(&workflow_id).map(|wf| &wf.core)
    }
}
