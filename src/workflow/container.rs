//! Software containers shipped with workflows

use serde::{Deserialize, Serialize};

use crate::workflow::WorkflowId;

/// A container image with the software stack of one workflow.
///
/// Value type; equality covers both fields. A VM that already holds the
/// container skips the provisioning delay for subsequent tasks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Container {
    /// Workflow this container belongs to
    pub workflow_id: WorkflowId,
    /// Time to provision the container on a VM, in seconds
    pub provision_time_s: u64,
}

impl Container {
    /// Create a container for a workflow
    pub fn new(workflow_id: WorkflowId, provision_time_s: u64) -> Self {
        Self {
            workflow_id,
            provision_time_s,
        }
    }

    /// Provisioning delay in seconds, as used by prediction formulas
    pub fn provision_secs(&self) -> f64 {
        self.provision_time_s as f64
    }
}
