//! Min-MinBUDG: proportional budget allocation with greedy placement
//!
//! Preprocessing estimates every task on the synthetic average VM type and
//! splits the workflow budget proportionally to those estimates. Placement
//! scans both catalog types and idle instances and takes the fastest host
//! the task (plus the carried-over pot) can afford.

use std::collections::HashMap;

use crate::config::SimulationConfig;
use crate::cost::{calculate_price_for_vm, estimate_price_for_vm_type};
use crate::error::{SimResult, SimulatorError};
use crate::event::{EventKind, EventType};
use crate::predict::execution_time;
use crate::scheduler::{
    dispatch_task_on_vm, enqueue_entry_tasks, enqueue_ready_children, provision_fresh_vm,
    shutdown_idle_near_boundary, Scheduler, SimContext,
};
use crate::vm::VmId;
use crate::workflow::{TaskId, Workflow, WorkflowId};

/// Per-task fields derived during preprocessing
#[derive(Debug, Clone, Copy, Default)]
struct TaskShare {
    /// Execution prediction on the average type
    exec_prediction: f64,
    /// Proportional share of the workflow budget
    budget: f64,
}

/// Min-MinBUDG view of a workflow
struct MinMinWorkflow {
    core: Workflow,
    info: Vec<TaskShare>,
    /// Sum of execution predictions, the proportionality base
    makespan: f64,
    /// Unspent budget carried forward across tasks
    pot: f64,
}

/// The host chosen for a task: a fresh lease or an idle instance
enum Host {
    Type(usize),
    Instance(VmId),
}

/// Budget-constrained greedy scheduler
pub struct MinMinScheduler {
    workflows: HashMap<WorkflowId, MinMinWorkflow>,
    config: SimulationConfig,
}

impl MinMinScheduler {
    /// Create a scheduler with default settings
    pub fn new() -> Self {
        Self {
            workflows: HashMap::new(),
            config: SimulationConfig::default(),
        }
    }
}

impl Default for MinMinScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for MinMinScheduler {
    fn name(&self) -> &'static str {
        "Min-MinBUDG"
    }

    fn configure(&mut self, config: &SimulationConfig) {
        self.config = config.clone();
    }

    fn submit_workflow(&mut self, ctx: &mut SimContext<'_>, workflow: Workflow) -> SimResult<()> {
        let workflow_id = workflow.id;
        let budget = workflow.budget().ok_or_else(|| {
            SimulatorError::Config("Min-MinBUDG requires a budget-constrained workflow".to_string())
        })?;
        let container_prov = workflow.container.provision_secs();
        let vm_prov = self.config.vm_provision_delay_s;
        let model = self.config.predict_model;

        // Makespan here is the sum of estimates on the average type, not the
        // critical path; it only serves as the proportionality base.
        let average = ctx.vms.average_vm_type();
        let mut info = vec![TaskShare::default(); workflow.tasks.len()];
        let mut makespan = 0.0;
        for task in &workflow.tasks {
            let exec = execution_time(
                model,
                task,
                &average,
                ctx.storage,
                None,
                container_prov,
                vm_prov,
            );
            info[task.id].exec_prediction = exec;
            makespan += exec;
        }
        if makespan > 0.0 {
            for share in &mut info {
                share.budget = share.exec_prediction / makespan * budget;
            }
        }

        tracing::info!(
            workflow = %workflow_id,
            name = %workflow.name,
            budget,
            makespan,
            "accepted workflow"
        );

        let submit_time = workflow.submit_time;
        self.workflows.insert(
            workflow_id,
            MinMinWorkflow {
                core: workflow,
                info,
                makespan,
                pot: 0.0,
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
        let available = wf.info[task_id].budget + wf.pot;
        let container_prov = wf.core.container.provision_secs();

        // Seed with the slowest type, then take any affordable host that is
        // strictly faster. Candidate times bake in provisioning.
        let (host, exec, price, affordable) = {
            let task = wf.core.task(task_id)?;
            let slowest = &ctx.vms.catalog()[0];
            let seed_exec = execution_time(
                model,
                task,
                slowest,
                ctx.storage,
                None,
                container_prov,
                vm_prov,
            );
            let seed_price = estimate_price_for_vm_type(seed_exec, slowest);
            let mut best = (Host::Type(0), seed_exec, seed_price);
            let mut affordable = seed_price <= available;

            for (idx, ty) in ctx.vms.catalog().iter().enumerate() {
                let exec =
                    execution_time(model, task, ty, ctx.storage, None, container_prov, vm_prov);
                let price = estimate_price_for_vm_type(exec, ty);
                if price <= available && exec < best.1 {
                    best = (Host::Type(idx), exec, price);
                    affordable = true;
                }
            }

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
                if price <= available && exec < best.1 {
                    best = (Host::Instance(vm_id), exec, price);
                    affordable = true;
                }
            }

            (best.0, best.1, best.2, affordable)
        };

        if !affordable {
            tracing::warn!(
                workflow = %workflow_id,
                task = task_id,
                available,
                price,
                "no host affordable within task budget; using slowest type"
            );
        }

        let vm_id = match host {
            Host::Type(idx) => {
                let ty = ctx.vms.catalog()[idx].clone();
                provision_fresh_vm(ctx, workflow_id, &ty)?
            }
            Host::Instance(vm_id) => vm_id,
        };

        wf.pot = available - price;
        // Provisioning is already inside `exec`; nothing is re-added here.
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventQueue;
    use crate::metrics::MetricCollector;
    use crate::storage::Storage;
    use crate::vm::{VmManager, VmType};
    use crate::workflow::WorkflowConstraint;

    fn catalog() -> Vec<VmType> {
        let mk = |name: &str, cpu: u32, price: f64| VmType {
            name: name.to_string(),
            cpu,
            memory_gb: 4,
            price_per_period: price,
            billing_period_s: 3600,
            io_bandwidth_mbps: 100,
        };
        vec![mk("slow", 1, 1.0), mk("fast", 4, 4.0)]
    }

    fn two_equal_tasks(budget: f64) -> Workflow {
        let mut wf = Workflow::new("pair", "", WorkflowConstraint::Budget(budget));
        wf.add_task("a", vec![], vec![], vec![], 100.0).unwrap();
        wf.add_task("b", vec![], vec![], vec![], 100.0).unwrap();
        wf
    }

    #[test]
    fn test_budget_split_is_proportional() {
        let mut scheduler = MinMinScheduler::new();
        scheduler.configure(&SimulationConfig {
            vm_provision_delay_s: 0.0,
            ..SimulationConfig::default()
        });

        let mut queue = EventQueue::new();
        let mut vms = VmManager::new(catalog()).unwrap();
        let mut collector = MetricCollector::new("Min-MinBUDG");
        let mut ctx = SimContext {
            queue: &mut queue,
            vms: &mut vms,
            storage: Storage::default(),
            collector: &mut collector,
        };

        let wf = two_equal_tasks(10.0);
        let id = wf.id;
        scheduler.submit_workflow(&mut ctx, wf).unwrap();

        let wf = &scheduler.workflows[&id];
        assert_eq!(wf.info[0].budget, 5.0);
        assert_eq!(wf.info[1].budget, 5.0);
        assert_eq!(wf.pot, 0.0);
    }

    #[test]
    fn test_unequal_tasks_get_unequal_shares() {
        let mut scheduler = MinMinScheduler::new();
        scheduler.configure(&SimulationConfig {
            vm_provision_delay_s: 0.0,
            ..SimulationConfig::default()
        });

        let mut queue = EventQueue::new();
        let mut vms = VmManager::new(catalog()).unwrap();
        let mut collector = MetricCollector::new("Min-MinBUDG");
        let mut ctx = SimContext {
            queue: &mut queue,
            vms: &mut vms,
            storage: Storage::default(),
            collector: &mut collector,
        };

        let mut wf = Workflow::new("pair", "", WorkflowConstraint::Budget(9.0));
        wf.add_task("a", vec![], vec![], vec![], 100.0).unwrap();
        wf.add_task("b", vec![], vec![], vec![], 200.0).unwrap();
        let id = wf.id;
        scheduler.submit_workflow(&mut ctx, wf).unwrap();

        let wf = &scheduler.workflows[&id];
        assert!((wf.info[0].budget - 3.0).abs() < 1e-9);
        assert!((wf.info[1].budget - 6.0).abs() < 1e-9);
        // Average type has 3 cores: 100/3 + 200/3 seconds in total.
        assert!((wf.makespan - 100.0).abs() < 1e-9);
    }
}
