//! Workflow domain model
//!
//! Files, containers, tasks, and the workflow DAG itself, plus ingestion of
//! WfCommons trace JSON.

mod container;
mod file;
mod instance;
mod parser;
mod task;

pub use container::Container;
pub use file::File;
pub use instance::{Workflow, WorkflowConstraint, WorkflowId};
pub use parser::TraceParser;
pub use task::{Task, TaskId, TaskState};
