//! Scheduling policies
//!
//! The common scheduler contract driven by the event loop, the context
//! handed into every hook, and the four interchangeable policies.

mod dyna;
mod ebpsm;
mod epsm;
mod minmin;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::SimulationConfig;
use crate::cost::time_until_next_billing_period;
use crate::error::{SimResult, SimulatorError};
use crate::event::{EventKind, EventQueue, EventType};
use crate::metrics::MetricCollector;
use crate::storage::Storage;
use crate::time::SimTime;
use crate::vm::{VmId, VmManager, VmType};
use crate::workflow::{TaskId, Workflow, WorkflowId};

pub use dyna::DynaScheduler;
pub use ebpsm::EbpsmScheduler;
pub use epsm::EpsmScheduler;
pub use minmin::MinMinScheduler;

/// Mutable simulation state handed into every scheduler hook.
///
/// The event queue carries the virtual clock; the VM manager and collector
/// are owned by the simulation and borrowed down for the duration of one
/// event dispatch.
pub struct SimContext<'a> {
    /// Event queue and virtual clock
    pub queue: &'a mut EventQueue,
    /// VM catalog and instances
    pub vms: &'a mut VmManager,
    /// The shared storage service
    pub storage: Storage,
    /// Run metrics
    pub collector: &'a mut MetricCollector,
}

impl SimContext<'_> {
    /// Current virtual time
    pub fn now(&self) -> SimTime {
        self.queue.current_time()
    }
}

/// Contract shared by every scheduling policy.
///
/// All hooks are invoked by the event loop; handlers run to completion and
/// model any waiting by enqueueing future events.
pub trait Scheduler {
    /// Policy name as reported in metrics
    fn name(&self) -> &'static str;

    /// Apply driver configuration; called once before the loop starts
    fn configure(&mut self, config: &SimulationConfig);

    /// Accept and preprocess a workflow, then enqueue its
    /// `SCHEDULE_WORKFLOW` event at the submission time
    fn submit_workflow(&mut self, ctx: &mut SimContext<'_>, workflow: Workflow) -> SimResult<()>;

    /// Enqueue `SCHEDULE_TASK` for every entry task
    fn schedule_workflow(
        &mut self,
        ctx: &mut SimContext<'_>,
        workflow_id: WorkflowId,
    ) -> SimResult<()>;

    /// Place one task: select or provision a VM, reserve it, and enqueue the
    /// task's `FINISH_TASK`
    fn schedule_task(
        &mut self,
        ctx: &mut SimContext<'_>,
        workflow_id: WorkflowId,
        task_id: TaskId,
    ) -> SimResult<()>;

    /// Complete a task: release its VM and enqueue children that became ready
    fn finish_task(
        &mut self,
        ctx: &mut SimContext<'_>,
        workflow_id: WorkflowId,
        task_id: TaskId,
        vm_id: VmId,
    ) -> SimResult<()>;

    /// Periodic resource deprovisioning; `next_event` is the type of the
    /// next queued event so the hook can avoid re-arming behind itself
    fn manage_resources(
        &mut self,
        ctx: &mut SimContext<'_>,
        next_event: Option<EventType>,
    ) -> SimResult<()>;

    /// The core view of a submitted workflow, for status inspection
    fn workflow(&self, workflow_id: WorkflowId) -> Option<&Workflow>;
}

/// Tag for selecting a scheduling policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    /// Deadline-driven EPSM
    Epsm,
    /// Budget-driven EBPSM
    Ebpsm,
    /// A*-configuration-search Dyna
    Dyna,
    /// Proportional-budget Min-MinBUDG
    MinMin,
}

impl SchedulerKind {
    /// Instantiate the policy behind this tag
    pub fn create(self) -> Box<dyn Scheduler> {
        match self {
            SchedulerKind::Epsm => Box::new(EpsmScheduler::new()),
            SchedulerKind::Ebpsm => Box::new(EbpsmScheduler::new()),
            SchedulerKind::Dyna => Box::new(DynaScheduler::new()),
            SchedulerKind::MinMin => Box::new(MinMinScheduler::new()),
        }
    }

    /// Policy name as reported in metrics
    pub fn name(self) -> &'static str {
        match self {
            SchedulerKind::Epsm => "EPSM",
            SchedulerKind::Ebpsm => "EBPSM",
            SchedulerKind::Dyna => "Dyna",
            SchedulerKind::MinMin => "Min-MinBUDG",
        }
    }
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for SchedulerKind {
    type Err = SimulatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EPSM" => Ok(SchedulerKind::Epsm),
            "EBPSM" => Ok(SchedulerKind::Ebpsm),
            "Dyna" => Ok(SchedulerKind::Dyna),
            "Min-MinBUDG" => Ok(SchedulerKind::MinMin),
            other => Err(SimulatorError::Config(format!(
                "unknown scheduler '{}'",
                other
            ))),
        }
    }
}

/// Mark every entry task scheduled and enqueue its `SCHEDULE_TASK` at the
/// current time
pub(crate) fn enqueue_entry_tasks(ctx: &mut SimContext<'_>, workflow: &mut Workflow) -> SimResult<()> {
    let now = ctx.now();
    for task_id in workflow.roots() {
        workflow.task_mut(task_id)?.mark_scheduled()?;
        ctx.collector.record_scheduled_task();
        ctx.queue.push(
            now,
            EventKind::ScheduleTask {
                workflow_id: workflow.id,
                task_id,
            },
        );
    }
    Ok(())
}

/// Mark and enqueue every child of `finished` whose parents have all finished
pub(crate) fn enqueue_ready_children(
    ctx: &mut SimContext<'_>,
    workflow: &mut Workflow,
    finished: TaskId,
) -> SimResult<()> {
    let now = ctx.now();
    for task_id in workflow.ready_children(finished) {
        workflow.task_mut(task_id)?.mark_scheduled()?;
        ctx.collector.record_scheduled_task();
        ctx.queue.push(
            now,
            EventKind::ScheduleTask {
                workflow_id: workflow.id,
                task_id,
            },
        );
    }
    Ok(())
}

/// Lease a fresh VM of a type at the current time and record it on the
/// workflow's stats
pub(crate) fn provision_fresh_vm(
    ctx: &mut SimContext<'_>,
    workflow_id: WorkflowId,
    ty: &VmType,
) -> SimResult<VmId> {
    let now = ctx.now();
    let vm_id = ctx.vms.init_vm(ty);
    ctx.vms.provision_vm(vm_id, now)?;
    ctx.collector.record_initialized_vm(workflow_id, vm_id);
    Ok(vm_id)
}

/// Reserve a VM for a task, stamp its files and container onto the VM, bill
/// the incremental price, and enqueue the task's `FINISH_TASK`.
///
/// `exec_time_s` must already include every provisioning component the
/// caller's prediction accounted for.
pub(crate) fn dispatch_task_on_vm(
    ctx: &mut SimContext<'_>,
    workflow: &mut Workflow,
    task_id: TaskId,
    vm_id: VmId,
    exec_time_s: f64,
    price: f64,
) -> SimResult<()> {
    let now = ctx.now();
    ctx.vms.reserve_vm(vm_id, workflow.id, task_id)?;

    let task = workflow.task_mut(task_id)?;
    task.start_time = Some(now);
    let vm = ctx.vms.vm_mut(vm_id)?;
    vm.add_container(task.container.clone());
    vm.add_files(task.input_files.iter().cloned());
    vm.add_files(task.output_files.iter().cloned());

    ctx.collector.record_used_vm(workflow.id, vm_id);
    ctx.collector.add_task_cost(workflow.id, price);

    tracing::debug!(
        workflow = %workflow.id,
        task = task_id,
        vm = %vm_id,
        exec_time_s,
        price,
        "dispatched task"
    );

    ctx.queue.push(
        now + exec_time_s,
        EventKind::FinishTask {
            workflow_id: workflow.id,
            task_id,
            vm_id,
        },
    );
    Ok(())
}

/// Shut down idle VMs that are close to their next billing boundary.
///
/// A VM is shut down when less than `threshold(period) = (1 − percent) ×
/// period` seconds remain in its current paid period.
pub(crate) fn shutdown_idle_near_boundary(
    ctx: &mut SimContext<'_>,
    deprovision_percent: f64,
) -> SimResult<()> {
    let now = ctx.now();
    for vm_id in ctx.vms.idle_vms() {
        let vm = ctx.vms.vm(vm_id)?;
        let threshold = (1.0 - deprovision_percent) * vm.vm_type.billing_period_s as f64;
        if time_until_next_billing_period(now, vm)? < threshold {
            ctx.vms.shutdown_vm(now, vm_id, ctx.collector)?;
        }
    }
    Ok(())
}

/// Whether a `MANAGE_RESOURCES` hook may re-arm itself: only when another
/// event is queued and it is not already a `MANAGE_RESOURCES`
pub(crate) fn may_rearm(next_event: Option<EventType>) -> bool {
    match next_event {
        None => false,
        Some(EventType::ManageResources) => false,
        Some(_) => true,
    }
}
