//! Simulation driver
//!
//! Owns the event queue, the VM and storage managers, the scheduler, and the
//! metric collector, and runs the virtual-time event loop to completion.

use crate::config::SimulationConfig;
use crate::error::{SimResult, SimulatorError};
use crate::event::{EventKind, EventQueue};
use crate::metrics::MetricCollector;
use crate::scheduler::{Scheduler, SchedulerKind, SimContext};
use crate::storage::StorageManager;
use crate::time::SimTime;
use crate::vm::{VmManager, VmType};
use crate::workflow::{Workflow, WorkflowId};

/// Holder of one simulation run.
///
/// A driver submits workflows with their submission times, calls
/// [`Simulation::run`], and reads results from the collector. Parallel
/// experiments use independent `Simulation` instances.
pub struct Simulation {
    scheduler: Box<dyn Scheduler>,
    queue: EventQueue,
    vms: VmManager,
    storage: StorageManager,
    collector: MetricCollector,
}

impl Simulation {
    /// Create a simulation over a catalog with the given policy and
    /// configuration
    pub fn new(
        kind: SchedulerKind,
        catalog: Vec<VmType>,
        config: SimulationConfig,
    ) -> SimResult<Self> {
        config.validate()?;

        let mut vms = VmManager::new(catalog)?;
        if let Some(period) = config.billing_period_s {
            vms.set_billing_period(period)?;
        }
        vms.set_provision_delay(config.vm_provision_delay_s);

        let mut scheduler = kind.create();
        scheduler.configure(&config);

        Ok(Self {
            scheduler,
            queue: EventQueue::new(),
            vms,
            storage: StorageManager::default(),
            collector: MetricCollector::new(kind.name()),
        })
    }

    /// Enqueue a workflow submission at a virtual time
    pub fn submit_workflow(&mut self, mut workflow: Workflow, submit_time: SimTime) {
        workflow.set_submit_time(submit_time);
        self.queue.push(
            submit_time,
            EventKind::SubmitWorkflow {
                workflow: Box::new(workflow),
            },
        );
    }

    /// Run the event loop until the queue drains, then finalize metrics.
    ///
    /// Scheduler-local admission failures (an infeasible deadline) reject
    /// the affected workflow and the loop continues; configuration and
    /// invariant violations abort the run.
    pub fn run(&mut self) -> SimResult<&MetricCollector> {
        while let Some(event) = self.queue.pop() {
            let now = self.queue.current_time();
            if self.collector.start_time.is_none() {
                self.collector.start_time = Some(now);
            }

            match event.kind {
                EventKind::SubmitWorkflow { workflow } => {
                    let workflow = *workflow;
                    let workflow_id = workflow.id;
                    let stats = self.collector.stats_mut(workflow_id);
                    stats.name = workflow.name.clone();
                    stats.start_time = Some(now);
                    stats.constraint = Some(workflow.constraint);
                    stats.total_tasks = workflow.tasks.len();
                    self.collector.workflows_total_tasks += workflow.tasks.len();

                    let mut ctx = SimContext {
                        queue: &mut self.queue,
                        vms: &mut self.vms,
                        storage: self.storage.storage(),
                        collector: &mut self.collector,
                    };
                    match self.scheduler.submit_workflow(&mut ctx, workflow) {
                        Ok(()) => {}
                        Err(SimulatorError::InfeasibleDeadline {
                            workflow_id,
                            makespan_s,
                            deadline,
                        }) => {
                            tracing::warn!(
                                workflow = %workflow_id,
                                makespan_s,
                                deadline = %deadline,
                                "rejected workflow: infeasible deadline"
                            );
                            self.collector.stats_mut(workflow_id).rejected = true;
                        }
                        Err(err) => return Err(err),
                    }
                }
                EventKind::ScheduleWorkflow { workflow_id } => {
                    let mut ctx = SimContext {
                        queue: &mut self.queue,
                        vms: &mut self.vms,
                        storage: self.storage.storage(),
                        collector: &mut self.collector,
                    };
                    self.scheduler.schedule_workflow(&mut ctx, workflow_id)?;
                }
                EventKind::ScheduleTask {
                    workflow_id,
                    task_id,
                } => {
                    let mut ctx = SimContext {
                        queue: &mut self.queue,
                        vms: &mut self.vms,
                        storage: self.storage.storage(),
                        collector: &mut self.collector,
                    };
                    self.scheduler.schedule_task(&mut ctx, workflow_id, task_id)?;
                }
                EventKind::FinishTask {
                    workflow_id,
                    task_id,
                    vm_id,
                } => {
                    self.collector.finished_tasks += 1;
                    let mut ctx = SimContext {
                        queue: &mut self.queue,
                        vms: &mut self.vms,
                        storage: self.storage.storage(),
                        collector: &mut self.collector,
                    };
                    self.scheduler
                        .finish_task(&mut ctx, workflow_id, task_id, vm_id)?;
                    self.collector.stats_mut(workflow_id).finish_time = Some(now);
                }
                EventKind::ManageResources => {
                    let next_event = self.queue.peek_type();
                    let mut ctx = SimContext {
                        queue: &mut self.queue,
                        vms: &mut self.vms,
                        storage: self.storage.storage(),
                        collector: &mut self.collector,
                    };
                    self.scheduler.manage_resources(&mut ctx, next_event)?;
                }
            }
        }

        // Queue drained: end every remaining lease and evaluate constraints.
        let now = self.queue.current_time();
        let vms_left = self.vms.shutdown_idle_vms(now, &mut self.collector)?;
        self.collector.vms_left = vms_left;
        self.collector.finish_time = Some(now);
        self.collector.evaluate_constraints();

        tracing::info!(
            scheduler = self.scheduler.name(),
            cost = self.collector.cost,
            finished_tasks = self.collector.finished_tasks,
            constraints_met = self.collector.constraints_met,
            "simulation finished"
        );
        Ok(&self.collector)
    }

    /// The metric collector of this run
    pub fn collector(&self) -> &MetricCollector {
        &self.collector
    }

    /// The VM manager, exposing every instance ever leased
    pub fn vm_manager(&self) -> &VmManager {
        &self.vms
    }

    /// The core view of a submitted workflow, if the scheduler accepted it
    pub fn workflow(&self, workflow_id: WorkflowId) -> Option<&Workflow> {
        self.scheduler.workflow(workflow_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predict::PredictModel;
    use crate::workflow::WorkflowConstraint;

    fn catalog() -> Vec<VmType> {
        vec![VmType {
            name: "slow".to_string(),
            cpu: 1,
            memory_gb: 4,
            price_per_period: 1.0,
            billing_period_s: 3600,
            io_bandwidth_mbps: 100,
        }]
    }

    fn config() -> SimulationConfig {
        SimulationConfig {
            predict_model: PredictModel::IoAndRuntime,
            vm_provision_delay_s: 0.0,
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn test_empty_run_finishes_cleanly() {
        let mut sim = Simulation::new(SchedulerKind::Epsm, catalog(), config()).unwrap();
        let collector = sim.run().unwrap();
        assert_eq!(collector.cost, 0.0);
        assert_eq!(collector.workflows_total_tasks, 0);
    }

    #[test]
    fn test_single_task_run() {
        let mut sim = Simulation::new(SchedulerKind::Ebpsm, catalog(), config()).unwrap();
        let mut wf = Workflow::new("single", "", WorkflowConstraint::Budget(10.0));
        wf.add_task("t", vec![], vec![], vec![], 60.0).unwrap();
        let id = wf.id;
        sim.submit_workflow(wf, SimTime::ZERO);

        let collector = sim.run().unwrap();
        assert_eq!(collector.finished_tasks, 1);
        assert_eq!(collector.scheduled_tasks, 1);
        assert!(collector.workflows[&id].constraint_met);
        assert!(sim.workflow(id).unwrap().is_finished());
    }

    #[test]
    fn test_rejected_billing_period_config() {
        let bad = SimulationConfig {
            billing_period_s: Some(0),
            ..config()
        };
        assert!(Simulation::new(SchedulerKind::Epsm, catalog(), bad).is_err());
    }
}
