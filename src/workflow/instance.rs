//! Workflow instances

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{SimResult, SimulatorError};
use crate::time::SimTime;
use crate::workflow::{Container, File, Task, TaskId, TaskState};

/// Unique identifier for a workflow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(pub Uuid);

impl WorkflowId {
    /// Generate a new workflow ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from string
    pub fn parse_str(s: &str) -> SimResult<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| SimulatorError::BadTrace(format!("invalid workflow id: {}", e)))
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The single constraint attached to a workflow.
///
/// Deadline-driven policies consume `Deadline`, budget-driven policies
/// consume `Budget`; a workflow carries exactly one of the two.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowConstraint {
    /// Absolute completion deadline
    Deadline(SimTime),
    /// Total dollar budget
    Budget(f64),
}

/// A workflow: a DAG of tasks with file-based dependencies.
///
/// Tasks are ordered by id and topologically pre-sorted; parent ids are
/// always smaller than child ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique instance id
    pub id: WorkflowId,
    /// Workflow name from the trace
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Tasks, indexed by their dense ids
    pub tasks: Vec<Task>,
    /// Virtual time the workflow enters the simulation
    pub submit_time: SimTime,
    /// Deadline or budget
    pub constraint: WorkflowConstraint,
    /// Container shared by all tasks of this workflow
    pub container: Container,
    /// Forward adjacency: children of each task
    children: Vec<Vec<TaskId>>,
}

impl Workflow {
    /// Create an empty workflow with a zero-provision-time container
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        constraint: WorkflowConstraint,
    ) -> Self {
        let id = WorkflowId::new();
        Self {
            id,
            name: name.into(),
            description: description.into(),
            tasks: Vec::new(),
            submit_time: SimTime::ZERO,
            constraint,
            container: Container::new(id, 0),
            children: Vec::new(),
        }
    }

    /// Replace the workflow container.
    ///
    /// Must be called before tasks are added; tasks stamp the container at
    /// creation time.
    pub fn set_container(&mut self, provision_time_s: u64) -> SimResult<()> {
        if !self.tasks.is_empty() {
            return Err(SimulatorError::BadTrace(
                "container must be set before tasks are added".to_string(),
            ));
        }
        self.container = Container::new(self.id, provision_time_s);
        Ok(())
    }

    /// Record the submission time; called by the simulation driver
    pub fn set_submit_time(&mut self, time: SimTime) {
        self.submit_time = time;
    }

    /// Append a task; its id is the current task count.
    ///
    /// Parents must already exist, which enforces the topological pre-sort
    /// guaranteed by trace ingestion.
    pub fn add_task(
        &mut self,
        name: impl Into<String>,
        parents: Vec<TaskId>,
        input_files: Vec<File>,
        output_files: Vec<File>,
        runtime_s: f64,
    ) -> SimResult<TaskId> {
        let id = self.tasks.len();
        for &parent in &parents {
            if parent >= id {
                return Err(SimulatorError::BadTrace(format!(
                    "task {} lists parent {} that is not defined before it",
                    id, parent
                )));
            }
            self.children[parent].push(id);
        }
        self.tasks.push(Task::new(
            self.id,
            id,
            name,
            parents,
            input_files,
            output_files,
            runtime_s,
            self.container.clone(),
        ));
        self.children.push(Vec::new());
        Ok(id)
    }

    /// Borrow a task by id
    pub fn task(&self, task_id: TaskId) -> SimResult<&Task> {
        self.tasks.get(task_id).ok_or(SimulatorError::TaskNotFound {
            workflow_id: self.id,
            task_id,
        })
    }

    /// Mutably borrow a task by id
    pub fn task_mut(&mut self, task_id: TaskId) -> SimResult<&mut Task> {
        let workflow_id = self.id;
        self.tasks
            .get_mut(task_id)
            .ok_or(SimulatorError::TaskNotFound {
                workflow_id,
                task_id,
            })
    }

    /// Ids of entry tasks (no parents)
    pub fn roots(&self) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|t| t.is_root())
            .map(|t| t.id)
            .collect()
    }

    /// Children of a task in the DAG
    pub fn children(&self, task_id: TaskId) -> &[TaskId] {
        self.children.get(task_id).map_or(&[], Vec::as_slice)
    }

    /// Children of `finished` that are still `Created` and whose parents have
    /// all finished
    pub fn ready_children(&self, finished: TaskId) -> Vec<TaskId> {
        self.children(finished)
            .iter()
            .copied()
            .filter(|&child| {
                self.tasks[child].state == TaskState::Created
                    && self.tasks[child]
                        .parents
                        .iter()
                        .all(|&p| self.tasks[p].is_finished())
            })
            .collect()
    }

    /// Ids of tasks still in `Created` state, ascending
    pub fn unscheduled_tasks(&self) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|t| t.state == TaskState::Created)
            .map(|t| t.id)
            .collect()
    }

    /// Whether every task has finished
    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(Task::is_finished)
    }

    /// The deadline, if this workflow is deadline-constrained
    pub fn deadline(&self) -> Option<SimTime> {
        match self.constraint {
            WorkflowConstraint::Deadline(d) => Some(d),
            WorkflowConstraint::Budget(_) => None,
        }
    }

    /// The budget, if this workflow is budget-constrained
    pub fn budget(&self) -> Option<f64> {
        match self.constraint {
            WorkflowConstraint::Budget(b) => Some(b),
            WorkflowConstraint::Deadline(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> Workflow {
        // 0 -> {1, 2} -> 3
        let mut wf = Workflow::new("diamond", "", WorkflowConstraint::Budget(10.0));
        wf.add_task("a", vec![], vec![], vec![], 1.0).unwrap();
        wf.add_task("b", vec![0], vec![], vec![], 1.0).unwrap();
        wf.add_task("c", vec![0], vec![], vec![], 1.0).unwrap();
        wf.add_task("d", vec![1, 2], vec![], vec![], 1.0).unwrap();
        wf
    }

    #[test]
    fn test_dag_adjacency() {
        let wf = diamond();
        assert_eq!(wf.roots(), vec![0]);
        assert_eq!(wf.children(0), &[1, 2]);
        assert_eq!(wf.children(3), &[] as &[TaskId]);
    }

    #[test]
    fn test_ready_children_wait_for_all_parents() {
        let mut wf = diamond();
        for id in [0, 1, 2] {
            wf.task_mut(id).unwrap().mark_scheduled().unwrap();
        }
        wf.task_mut(0).unwrap().mark_finished(SimTime::ZERO).unwrap();
        wf.task_mut(1).unwrap().mark_finished(SimTime::ZERO).unwrap();
        // Task 3 is not ready until task 2 also finishes.
        assert!(wf.ready_children(1).is_empty());
        wf.task_mut(2).unwrap().mark_finished(SimTime::ZERO).unwrap();
        assert_eq!(wf.ready_children(2), vec![3]);
    }

    #[test]
    fn test_forward_parent_reference_rejected() {
        let mut wf = Workflow::new("bad", "", WorkflowConstraint::Budget(1.0));
        let err = wf.add_task("a", vec![0], vec![], vec![], 1.0);
        assert!(matches!(err, Err(SimulatorError::BadTrace(_))));
    }

    #[test]
    fn test_unscheduled_shrinks() {
        let mut wf = diamond();
        assert_eq!(wf.unscheduled_tasks().len(), 4);
        wf.task_mut(0).unwrap().mark_scheduled().unwrap();
        assert_eq!(wf.unscheduled_tasks(), vec![1, 2, 3]);
    }
}
