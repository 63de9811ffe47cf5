//! Metric collection
//!
//! Per-workflow statistics and global tallies, collected by the event loop
//! and the schedulers during a run and finalized when the queue drains.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::time::SimTime;
use crate::vm::VmId;
use crate::workflow::{WorkflowConstraint, WorkflowId};

/// Statistics for one workflow
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkflowStats {
    /// Workflow name
    pub name: String,
    /// Virtual time of submission
    pub start_time: Option<SimTime>,
    /// Virtual time the last task finished
    pub finish_time: Option<SimTime>,
    /// Dollars billed on behalf of this workflow's tasks
    pub cost: f64,
    /// VMs leased on behalf of this workflow, in lease order
    pub initialized_vms: Vec<VmId>,
    /// VMs that executed at least one of its tasks
    pub used_vms: HashSet<VmId>,
    /// The deadline or budget it was submitted with
    pub constraint: Option<WorkflowConstraint>,
    /// Whether preprocessing rejected the workflow outright
    pub rejected: bool,
    /// Whether the constraint was met, set at finalization
    pub constraint_met: bool,
    /// Relative overshoot when the constraint was missed
    pub constraint_overflow: f64,
    /// Task count
    pub total_tasks: usize,
}

impl WorkflowStats {
    fn evaluate(&mut self) {
        self.constraint_met = false;
        self.constraint_overflow = 0.0;
        if self.rejected {
            return;
        }
        match (self.constraint, self.start_time, self.finish_time) {
            (Some(WorkflowConstraint::Deadline(deadline)), Some(start), Some(finish)) => {
                if finish <= deadline {
                    self.constraint_met = true;
                } else {
                    let window = deadline.duration_since(start);
                    if window > 0.0 {
                        self.constraint_overflow = finish.duration_since(deadline) / window;
                    }
                }
            }
            (Some(WorkflowConstraint::Budget(budget)), _, Some(_)) => {
                if self.cost <= budget {
                    self.constraint_met = true;
                } else if budget > 0.0 {
                    self.constraint_overflow = (self.cost - budget) / budget;
                }
            }
            _ => {}
        }
    }
}

/// Global tallies for one simulation run
#[derive(Debug, Clone, Serialize)]
pub struct MetricCollector {
    /// Name of the scheduling policy that produced this run
    pub scheduler_name: String,
    /// Per-workflow statistics
    pub workflows: HashMap<WorkflowId, WorkflowStats>,
    /// Total dollars billed across all VM leases
    pub cost: f64,
    /// Virtual time of the first dispatched event
    pub start_time: Option<SimTime>,
    /// Virtual time the queue drained
    pub finish_time: Option<SimTime>,
    /// VMs ever leased
    pub initialized_vms: usize,
    /// VMs shut down
    pub removed_vms: usize,
    /// VMs still leased when the queue drained
    pub vms_left: usize,
    /// VMs that executed at least one task
    pub used_vms: HashSet<VmId>,
    /// Tasks across all submitted workflows
    pub workflows_total_tasks: usize,
    /// Tasks that entered the scheduled state
    pub scheduled_tasks: usize,
    /// Tasks that finished
    pub finished_tasks: usize,
    /// Workflows whose constraint was met
    pub constraints_met: usize,
}

impl MetricCollector {
    /// Create a collector for a named scheduler
    pub fn new(scheduler_name: impl Into<String>) -> Self {
        Self {
            scheduler_name: scheduler_name.into(),
            workflows: HashMap::new(),
            cost: 0.0,
            start_time: None,
            finish_time: None,
            initialized_vms: 0,
            removed_vms: 0,
            vms_left: 0,
            used_vms: HashSet::new(),
            workflows_total_tasks: 0,
            scheduled_tasks: 0,
            finished_tasks: 0,
            constraints_met: 0,
        }
    }

    /// Borrow (or create) the stats entry for a workflow
    pub fn stats_mut(&mut self, workflow_id: WorkflowId) -> &mut WorkflowStats {
        self.workflows.entry(workflow_id).or_default()
    }

    /// Borrow the stats entry for a workflow
    pub fn stats(&self, workflow_id: WorkflowId) -> Option<&WorkflowStats> {
        self.workflows.get(&workflow_id)
    }

    /// Record a VM leased on behalf of a workflow
    pub fn record_initialized_vm(&mut self, workflow_id: WorkflowId, vm_id: VmId) {
        self.initialized_vms += 1;
        self.stats_mut(workflow_id).initialized_vms.push(vm_id);
    }

    /// Record a VM executing a task of a workflow
    pub fn record_used_vm(&mut self, workflow_id: WorkflowId, vm_id: VmId) {
        self.used_vms.insert(vm_id);
        self.stats_mut(workflow_id).used_vms.insert(vm_id);
    }

    /// Record a task entering the scheduled state
    pub fn record_scheduled_task(&mut self) {
        self.scheduled_tasks += 1;
    }

    /// Record the incremental price billed for one task placement
    pub fn add_task_cost(&mut self, workflow_id: WorkflowId, price: f64) {
        self.stats_mut(workflow_id).cost += price;
    }

    /// Evaluate every workflow's constraint; called once at finalization
    pub fn evaluate_constraints(&mut self) {
        self.constraints_met = 0;
        for stats in self.workflows.values_mut() {
            stats.evaluate();
            if stats.constraint_met {
                self.constraints_met += 1;
            }
        }
    }

    /// Serializable summary with deterministic workflow ordering
    pub fn report(&self) -> RunReport {
        let mut workflows: Vec<WorkflowReport> = self
            .workflows
            .iter()
            .map(|(id, stats)| WorkflowReport {
                workflow_id: *id,
                name: stats.name.clone(),
                cost: stats.cost,
                makespan_s: match (stats.start_time, stats.finish_time) {
                    (Some(start), Some(finish)) => Some(finish.duration_since(start)),
                    _ => None,
                },
                rejected: stats.rejected,
                constraint_met: stats.constraint_met,
                constraint_overflow: stats.constraint_overflow,
            })
            .collect();
        workflows.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then_with(|| a.workflow_id.0.cmp(&b.workflow_id.0))
        });

        RunReport {
            scheduler_name: self.scheduler_name.clone(),
            total_cost: self.cost,
            start_time: self.start_time,
            finish_time: self.finish_time,
            initialized_vms: self.initialized_vms,
            removed_vms: self.removed_vms,
            vms_left: self.vms_left,
            total_tasks: self.workflows_total_tasks,
            finished_tasks: self.finished_tasks,
            constraints_met: self.constraints_met,
            workflows,
        }
    }
}

/// Per-workflow entry of a [`RunReport`]
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowReport {
    pub workflow_id: WorkflowId,
    pub name: String,
    pub cost: f64,
    pub makespan_s: Option<f64>,
    pub rejected: bool,
    pub constraint_met: bool,
    pub constraint_overflow: f64,
}

/// Serializable summary of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub scheduler_name: String,
    pub total_cost: f64,
    pub start_time: Option<SimTime>,
    pub finish_time: Option<SimTime>,
    pub initialized_vms: usize,
    pub removed_vms: usize,
    pub vms_left: usize,
    pub total_tasks: usize,
    pub finished_tasks: usize,
    pub constraints_met: usize,
    pub workflows: Vec<WorkflowReport>,
}
