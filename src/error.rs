//! Error types for the simulator

use thiserror::Error;

use crate::time::SimTime;
use crate::vm::VmId;
use crate::workflow::{TaskId, WorkflowId};

/// Result type for simulator operations
pub type SimResult<T> = Result<T, SimulatorError>;

/// Error types for the simulation engine
#[derive(Error, Debug)]
pub enum SimulatorError {
    /// No VM type can fit the workflow makespan before its deadline.
    /// Fatal to that workflow; the simulation continues for others.
    #[error(
        "infeasible deadline for workflow {workflow_id}: \
         best makespan {makespan_s:.3} s misses deadline {deadline}"
    )]
    InfeasibleDeadline {
        workflow_id: WorkflowId,
        makespan_s: f64,
        deadline: SimTime,
    },

    /// Malformed workflow trace
    #[error("bad trace: {0}")]
    BadTrace(String),

    /// Malformed VM catalog
    #[error("bad catalog: {0}")]
    BadCatalog(String),

    /// Unknown prediction model string on driver input
    #[error("unknown prediction model: {0}")]
    InvalidPredictModel(String),

    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Config(String),

    /// VM or task state transition requested from an illegal source state
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Workflow not registered with the scheduler
    #[error("workflow {0} not found")]
    WorkflowNotFound(WorkflowId),

    /// Task id out of range for a workflow
    #[error("task {task_id} not found in workflow {workflow_id}")]
    TaskNotFound {
        workflow_id: WorkflowId,
        task_id: TaskId,
    },

    /// VM not tracked by the manager
    #[error("VM {0} not found")]
    VmNotFound(VmId),

    /// Catalog has no enabled VM types
    #[error("VM catalog is empty")]
    EmptyCatalog,

    /// I/O error reading an external resource
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error parsing an external resource
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
