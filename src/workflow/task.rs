//! Tasks and their execution state

use serde::{Deserialize, Serialize};

use crate::error::{SimResult, SimulatorError};
use crate::time::SimTime;
use crate::workflow::{Container, File, WorkflowId};

/// Dense task identifier, `0..N-1` within a workflow
pub type TaskId = usize;

/// Task execution state; transitions are monotone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Task exists but has not been handed to the scheduler
    Created,
    /// Task has a pending or running placement
    Scheduled,
    /// Task completed
    Finished,
}

/// One node of a workflow DAG.
///
/// Parents always carry strictly smaller ids; the trace parser pre-sorts
/// tasks topologically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Owning workflow
    pub workflow_id: WorkflowId,
    /// Dense id, equal to the task's index in `Workflow::tasks`
    pub id: TaskId,
    /// Task name from the trace
    pub name: String,
    /// Ids of predecessor tasks
    pub parents: Vec<TaskId>,
    /// Files read before execution
    pub input_files: Vec<File>,
    /// Files written after execution
    pub output_files: Vec<File>,
    /// Reference runtime in seconds, already normalized per core
    pub runtime_s: f64,
    /// Container required on the executing VM
    pub container: Container,
    /// Current execution state
    pub state: TaskState,
    /// Virtual time execution started on a VM
    pub start_time: Option<SimTime>,
    /// Virtual time execution finished
    pub finish_time: Option<SimTime>,
}

impl Task {
    /// Create a task in `Created` state
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        workflow_id: WorkflowId,
        id: TaskId,
        name: impl Into<String>,
        parents: Vec<TaskId>,
        input_files: Vec<File>,
        output_files: Vec<File>,
        runtime_s: f64,
        container: Container,
    ) -> Self {
        Self {
            workflow_id,
            id,
            name: name.into(),
            parents,
            input_files,
            output_files,
            runtime_s,
            container,
            state: TaskState::Created,
            start_time: None,
            finish_time: None,
        }
    }

    /// Transition `Created -> Scheduled`
    pub fn mark_scheduled(&mut self) -> SimResult<()> {
        match self.state {
            TaskState::Created => {
                self.state = TaskState::Scheduled;
                Ok(())
            }
            _ => Err(SimulatorError::InvalidStateTransition {
                from: format!("{:?}", self.state),
                to: "Scheduled".to_string(),
            }),
        }
    }

    /// Transition `Scheduled -> Finished`, recording the finish time
    pub fn mark_finished(&mut self, time: SimTime) -> SimResult<()> {
        match self.state {
            TaskState::Scheduled => {
                self.state = TaskState::Finished;
                self.finish_time = Some(time);
                Ok(())
            }
            _ => Err(SimulatorError::InvalidStateTransition {
                from: format!("{:?}", self.state),
                to: "Finished".to_string(),
            }),
        }
    }

    /// Whether the task has completed
    pub fn is_finished(&self) -> bool {
        self.state == TaskState::Finished
    }

    /// Whether the task is an entry task of its DAG
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        let wf = WorkflowId::new();
        Task::new(
            wf,
            0,
            "individuals_0",
            vec![],
            vec![],
            vec![],
            10.0,
            Container::new(wf, 0),
        )
    }

    #[test]
    fn test_state_progression() {
        let mut t = task();
        assert_eq!(t.state, TaskState::Created);
        t.mark_scheduled().unwrap();
        assert_eq!(t.state, TaskState::Scheduled);
        t.mark_finished(SimTime::from_secs(42.0)).unwrap();
        assert!(t.is_finished());
        assert_eq!(t.finish_time, Some(SimTime::from_secs(42.0)));
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let mut t = task();
        assert!(t.mark_finished(SimTime::ZERO).is_err());
        t.mark_scheduled().unwrap();
        assert!(t.mark_scheduled().is_err());
        t.mark_finished(SimTime::ZERO).unwrap();
        assert!(t.mark_scheduled().is_err());
        assert!(t.mark_finished(SimTime::ZERO).is_err());
    }
}
