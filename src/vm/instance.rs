//! VM instances and their lifecycle state machine

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{SimResult, SimulatorError};
use crate::time::SimTime;
use crate::vm::VmType;
use crate::workflow::{Container, File, TaskId, WorkflowId};

/// Unique identifier for a VM instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VmId(pub Uuid);

impl VmId {
    /// Generate a new VM ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for VmId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// VM lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmState {
    /// Created but not leased yet; accrues no cost
    NotProvisioned,
    /// Leased and idle
    Provisioned,
    /// Leased and executing exactly one task
    Busy,
    /// Lease ended; terminal
    Shutdown,
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmState::NotProvisioned => write!(f, "not_provisioned"),
            VmState::Provisioned => write!(f, "provisioned"),
            VmState::Busy => write!(f, "busy"),
            VmState::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// A virtual machine instance leased from the catalog.
///
/// Billing runs from `start_time` (provisioning) to `finish_time`
/// (shutdown); any started billing period is fully charged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vm {
    /// Unique instance id
    pub id: VmId,
    /// Catalog type this instance was leased as
    pub vm_type: VmType,
    /// Lifecycle state
    pub state: VmState,
    /// Virtual time the lease started
    pub start_time: Option<SimTime>,
    /// Virtual time the lease ended
    pub finish_time: Option<SimTime>,
    /// Virtual time of the last task release
    pub last_release_time: Option<SimTime>,
    /// Files present on local disk (task outputs or fetched inputs)
    files: HashSet<File>,
    /// Containers already provisioned on this VM
    containers: HashSet<Container>,
    /// Task currently reserving this VM
    reserved_by: Option<(WorkflowId, TaskId)>,
}

impl Vm {
    /// Create an instance in `NotProvisioned` state
    pub fn new(vm_type: VmType) -> Self {
        Self {
            id: VmId::new(),
            vm_type,
            state: VmState::NotProvisioned,
            start_time: None,
            finish_time: None,
            last_release_time: None,
            files: HashSet::new(),
            containers: HashSet::new(),
            reserved_by: None,
        }
    }

    fn invalid_transition(&self, to: &str) -> SimulatorError {
        SimulatorError::InvalidStateTransition {
            from: self.state.to_string(),
            to: to.to_string(),
        }
    }

    /// Transition `NotProvisioned -> Provisioned`, starting the lease
    pub fn provision(&mut self, time: SimTime) -> SimResult<()> {
        match self.state {
            VmState::NotProvisioned => {
                self.state = VmState::Provisioned;
                self.start_time = Some(time);
                Ok(())
            }
            _ => Err(self.invalid_transition("provisioned")),
        }
    }

    /// Transition `Provisioned -> Busy` on behalf of one task
    pub fn reserve(&mut self, workflow_id: WorkflowId, task_id: TaskId) -> SimResult<()> {
        match self.state {
            VmState::Provisioned => {
                self.state = VmState::Busy;
                self.reserved_by = Some((workflow_id, task_id));
                Ok(())
            }
            _ => Err(self.invalid_transition("busy")),
        }
    }

    /// Transition `Busy -> Provisioned`, recording the release time
    pub fn release(&mut self, time: SimTime) -> SimResult<()> {
        match self.state {
            VmState::Busy => {
                self.state = VmState::Provisioned;
                self.reserved_by = None;
                self.last_release_time = Some(time);
                Ok(())
            }
            _ => Err(self.invalid_transition("provisioned")),
        }
    }

    /// Transition `Provisioned -> Shutdown`, ending the lease
    pub fn shutdown(&mut self, time: SimTime) -> SimResult<()> {
        match self.state {
            VmState::Provisioned => {
                self.state = VmState::Shutdown;
                self.finish_time = Some(time);
                Ok(())
            }
            _ => Err(self.invalid_transition("shutdown")),
        }
    }

    /// The task currently reserving this VM, if busy
    pub fn reserved_by(&self) -> Option<(WorkflowId, TaskId)> {
        self.reserved_by
    }

    /// Whether every given file is already present on local disk
    pub fn has_files(&self, files: &[File]) -> bool {
        files.iter().all(|f| self.files.contains(f))
    }

    /// Whether the container is already provisioned here
    pub fn has_container(&self, container: &Container) -> bool {
        self.containers.contains(container)
    }

    /// Record files as present on local disk
    pub fn add_files(&mut self, files: impl IntoIterator<Item = File>) {
        self.files.extend(files);
    }

    /// Record a container as provisioned here
    pub fn add_container(&mut self, container: Container) {
        self.containers.insert(container);
    }

    /// When the VM last became idle: the last release, or the lease start
    pub fn idle_since(&self) -> Option<SimTime> {
        self.last_release_time.or(self.start_time)
    }

    /// Total lease cost at shutdown; zero if the lease never started or ended
    pub fn cost(&self) -> f64 {
        match self.finish_time {
            Some(finish) => self.cost_at(finish),
            None => 0.0,
        }
    }

    /// Lease cost accrued at `time`: every started billing period is charged
    pub fn cost_at(&self, time: SimTime) -> f64 {
        let Some(start) = self.start_time else {
            return 0.0;
        };
        let elapsed = time.duration_since(start);
        if elapsed <= 0.0 {
            return 0.0;
        }
        let periods = (elapsed / self.vm_type.billing_period_s as f64).ceil();
        periods * self.vm_type.price_per_period
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slow_type() -> VmType {
        VmType {
            name: "slow".to_string(),
            cpu: 1,
            memory_gb: 4,
            price_per_period: 1.0,
            billing_period_s: 3600,
            io_bandwidth_mbps: 100,
        }
    }

    #[test]
    fn test_lifecycle() {
        let wf = WorkflowId::new();
        let mut vm = Vm::new(slow_type());
        assert_eq!(vm.state, VmState::NotProvisioned);

        vm.provision(SimTime::ZERO).unwrap();
        assert_eq!(vm.start_time, Some(SimTime::ZERO));

        vm.reserve(wf, 0).unwrap();
        assert_eq!(vm.reserved_by(), Some((wf, 0)));

        vm.release(SimTime::from_secs(100.0)).unwrap();
        assert_eq!(vm.last_release_time, Some(SimTime::from_secs(100.0)));
        assert_eq!(vm.reserved_by(), None);

        vm.shutdown(SimTime::from_secs(200.0)).unwrap();
        assert_eq!(vm.state, VmState::Shutdown);
    }

    #[test]
    fn test_illegal_transitions() {
        let wf = WorkflowId::new();
        let mut vm = Vm::new(slow_type());
        // Reserving or shutting down a NotProvisioned VM is a state violation.
        assert!(vm.reserve(wf, 0).is_err());
        assert!(vm.shutdown(SimTime::ZERO).is_err());

        vm.provision(SimTime::ZERO).unwrap();
        assert!(vm.provision(SimTime::ZERO).is_err());
        assert!(vm.release(SimTime::ZERO).is_err());

        vm.reserve(wf, 0).unwrap();
        assert!(vm.reserve(wf, 1).is_err());
        assert!(vm.shutdown(SimTime::ZERO).is_err());
    }

    #[test]
    fn test_billing_boundary_cost() {
        // Started at t=0, shut down at t=3601 with a 3600 s period: 2 periods.
        let mut vm = Vm::new(slow_type());
        vm.provision(SimTime::ZERO).unwrap();
        vm.shutdown(SimTime::from_secs(3601.0)).unwrap();
        assert_eq!(vm.cost(), 2.0);
    }

    #[test]
    fn test_exact_period_cost() {
        let mut vm = Vm::new(slow_type());
        vm.provision(SimTime::ZERO).unwrap();
        vm.shutdown(SimTime::from_secs(3600.0)).unwrap();
        assert_eq!(vm.cost(), 1.0);
    }

    #[test]
    fn test_zero_elapsed_costs_nothing() {
        let mut vm = Vm::new(slow_type());
        vm.provision(SimTime::from_secs(5.0)).unwrap();
        assert_eq!(vm.cost_at(SimTime::from_secs(5.0)), 0.0);
        assert_eq!(Vm::new(slow_type()).cost(), 0.0);
    }

    #[test]
    fn test_file_and_container_presence() {
        let wf = WorkflowId::new();
        let mut vm = Vm::new(slow_type());
        let files = vec![File::new("a", 1), File::new("b", 2)];
        assert!(vm.has_files(&[]));
        assert!(!vm.has_files(&files));
        vm.add_files(files.clone());
        assert!(vm.has_files(&files));

        let container = Container::new(wf, 60);
        assert!(!vm.has_container(&container));
        vm.add_container(container.clone());
        assert!(vm.has_container(&container));
    }
}
