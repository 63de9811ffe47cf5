//! VM manager
//!
//! Owns the immutable type catalog and every VM instance, maintains the idle
//! index, and finalizes lease costs into the metric collector at shutdown.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{SimResult, SimulatorError};
use crate::metrics::MetricCollector;
use crate::time::SimTime;
use crate::vm::{load_catalog_file, Vm, VmId, VmType};
use crate::workflow::{Container, Task, TaskId, WorkflowId};

/// Manager for the VM catalog and all leased instances.
///
/// The idle index keeps insertion order so candidate scans are deterministic
/// across runs and platforms.
#[derive(Debug)]
pub struct VmManager {
    /// Enabled types, ascending by price
    catalog: Vec<VmType>,
    /// Every instance ever created, including shut-down ones
    vms: HashMap<VmId, Vm>,
    /// Ids of PROVISIONED instances, in insertion order
    idle: Vec<VmId>,
    /// Uniform provisioning delay applied to every VM, in seconds
    provision_delay_s: f64,
}

impl VmManager {
    /// Create a manager over a catalog; types are sorted ascending by price
    pub fn new(mut catalog: Vec<VmType>) -> SimResult<Self> {
        if catalog.is_empty() {
            return Err(SimulatorError::EmptyCatalog);
        }
        catalog.sort_by(|a, b| {
            a.price_per_period
                .total_cmp(&b.price_per_period)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(Self {
            catalog,
            vms: HashMap::new(),
            idle: Vec::new(),
            provision_delay_s: 0.0,
        })
    }

    /// Create a manager from a catalog JSON file
    pub fn from_catalog_file(path: impl AsRef<Path>) -> SimResult<Self> {
        Self::new(load_catalog_file(path)?)
    }

    /// Rescale every type to a uniform billing period, preserving the price
    /// per second. Must be called before any VM exists.
    pub fn set_billing_period(&mut self, period_s: u64) -> SimResult<()> {
        if period_s == 0 {
            return Err(SimulatorError::Config(
                "billing period must be positive".to_string(),
            ));
        }
        if !self.vms.is_empty() {
            return Err(SimulatorError::Config(
                "billing period must be set before any VM is created".to_string(),
            ));
        }
        for ty in &mut self.catalog {
            ty.price_per_period = ty.price_per_period * period_s as f64 / ty.billing_period_s as f64;
            ty.billing_period_s = period_s;
        }
        Ok(())
    }

    /// Set the uniform VM provisioning delay
    pub fn set_provision_delay(&mut self, delay_s: f64) {
        self.provision_delay_s = delay_s;
    }

    /// The uniform VM provisioning delay in seconds
    pub fn provision_delay(&self) -> f64 {
        self.provision_delay_s
    }

    /// The full catalog, ascending by price
    pub fn catalog(&self) -> &[VmType] {
        &self.catalog
    }

    /// Catalog suffix strictly after the given type, by catalog index
    pub fn vm_types_faster_than(&self, ty: &VmType) -> &[VmType] {
        match self.type_index(ty) {
            Some(idx) => &self.catalog[idx + 1..],
            None => &[],
        }
    }

    /// Index of a type in the price-ordered catalog
    pub fn type_index(&self, ty: &VmType) -> Option<usize> {
        self.catalog.iter().position(|t| t.name == ty.name)
    }

    /// Cheapest (slowest) type in the catalog
    pub fn slowest_vm_type(&self) -> &VmType {
        &self.catalog[0]
    }

    /// Most expensive (fastest) type in the catalog
    pub fn fastest_vm_type(&self) -> &VmType {
        &self.catalog[self.catalog.len() - 1]
    }

    /// Synthetic type whose scalar fields are catalog means.
    ///
    /// Used only by heuristics; never leased.
    pub fn average_vm_type(&self) -> VmType {
        let n = self.catalog.len() as f64;
        let mean =
            |f: &dyn Fn(&VmType) -> f64| self.catalog.iter().map(|t| f(t)).sum::<f64>() / n;
        VmType {
            name: "average".to_string(),
            cpu: (mean(&|t| t.cpu as f64).round() as u32).max(1),
            memory_gb: (mean(&|t| t.memory_gb as f64).round() as u32).max(1),
            price_per_period: mean(&|t| t.price_per_period),
            billing_period_s: (mean(&|t| t.billing_period_s as f64).round() as u64).max(1),
            io_bandwidth_mbps: (mean(&|t| t.io_bandwidth_mbps as f64).round() as u32).max(1),
        }
    }

    /// Ids of idle (PROVISIONED) VMs, in insertion order
    pub fn idle_vms(&self) -> Vec<VmId> {
        self.idle.clone()
    }

    /// Idle VMs filtered to those already holding all of the task's input
    /// files, or the given container; the union when both filters are given.
    pub fn idle_vms_for(&self, task: Option<&Task>, container: Option<&Container>) -> Vec<VmId> {
        if task.is_none() && container.is_none() {
            return self.idle_vms();
        }
        self.idle
            .iter()
            .copied()
            .filter(|id| {
                let vm = &self.vms[id];
                let by_files = task.is_some_and(|t| vm.has_files(&t.input_files));
                let by_container = container.is_some_and(|c| vm.has_container(c));
                by_files || by_container
            })
            .collect()
    }

    /// Create a NOT_PROVISIONED instance of a type and track it
    pub fn init_vm(&mut self, ty: &VmType) -> VmId {
        let vm = Vm::new(ty.clone());
        let id = vm.id;
        self.vms.insert(id, vm);
        id
    }

    /// Start the lease of an instance and add it to the idle index
    pub fn provision_vm(&mut self, vm_id: VmId, time: SimTime) -> SimResult<()> {
        let vm = self.vm_mut(vm_id)?;
        vm.provision(time)?;
        tracing::debug!(vm = %vm_id, vm_type = %vm.vm_type.name, at = %time, "provisioned VM");
        self.idle.push(vm_id);
        Ok(())
    }

    /// Reserve an idle instance for one task
    pub fn reserve_vm(&mut self, vm_id: VmId, workflow_id: WorkflowId, task_id: TaskId) -> SimResult<()> {
        let vm = self.vm_mut(vm_id)?;
        vm.reserve(workflow_id, task_id)?;
        self.idle.retain(|&id| id != vm_id);
        Ok(())
    }

    /// Release a busy instance back into the idle index
    pub fn release_vm(&mut self, vm_id: VmId, time: SimTime) -> SimResult<()> {
        let vm = self.vm_mut(vm_id)?;
        vm.release(time)?;
        self.idle.push(vm_id);
        Ok(())
    }

    /// End the lease of an idle instance and add its cost to the collector
    pub fn shutdown_vm(
        &mut self,
        time: SimTime,
        vm_id: VmId,
        collector: &mut MetricCollector,
    ) -> SimResult<()> {
        let vm = self.vm_mut(vm_id)?;
        vm.shutdown(time)?;
        let cost = vm.cost();
        tracing::debug!(vm = %vm_id, at = %time, cost, "shut down VM");
        self.idle.retain(|&id| id != vm_id);
        collector.cost += cost;
        collector.removed_vms += 1;
        Ok(())
    }

    /// Shut down every remaining idle VM at the end of the simulation.
    ///
    /// Returns how many VMs were still leased.
    pub fn shutdown_idle_vms(
        &mut self,
        time: SimTime,
        collector: &mut MetricCollector,
    ) -> SimResult<usize> {
        let remaining = self.idle.clone();
        for vm_id in &remaining {
            self.shutdown_vm(time, *vm_id, collector)?;
        }
        Ok(remaining.len())
    }

    /// Borrow an instance by id
    pub fn vm(&self, vm_id: VmId) -> SimResult<&Vm> {
        self.vms.get(&vm_id).ok_or(SimulatorError::VmNotFound(vm_id))
    }

    /// Mutably borrow an instance by id
    pub fn vm_mut(&mut self, vm_id: VmId) -> SimResult<&mut Vm> {
        self.vms
            .get_mut(&vm_id)
            .ok_or(SimulatorError::VmNotFound(vm_id))
    }

    /// Iterate over every instance ever created
    pub fn vms(&self) -> impl Iterator<Item = &Vm> {
        self.vms.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::VmState;
    use crate::workflow::File;

    fn catalog() -> Vec<VmType> {
        vec![
            VmType {
                name: "fast".to_string(),
                cpu: 4,
                memory_gb: 16,
                price_per_period: 4.0,
                billing_period_s: 3600,
                io_bandwidth_mbps: 400,
            },
            VmType {
                name: "slow".to_string(),
                cpu: 1,
                memory_gb: 4,
                price_per_period: 1.0,
                billing_period_s: 3600,
                io_bandwidth_mbps: 100,
            },
        ]
    }

    #[test]
    fn test_catalog_ordering() {
        let mgr = VmManager::new(catalog()).unwrap();
        assert_eq!(mgr.slowest_vm_type().name, "slow");
        assert_eq!(mgr.fastest_vm_type().name, "fast");
        let faster = mgr.vm_types_faster_than(mgr.slowest_vm_type());
        assert_eq!(faster.len(), 1);
        assert_eq!(faster[0].name, "fast");
        assert!(mgr.vm_types_faster_than(mgr.fastest_vm_type()).is_empty());
    }

    #[test]
    fn test_average_vm_type() {
        let mgr = VmManager::new(catalog()).unwrap();
        let avg = mgr.average_vm_type();
        assert_eq!(avg.cpu, 3); // round(2.5)
        assert_eq!(avg.price_per_period, 2.5);
        assert_eq!(avg.billing_period_s, 3600);
    }

    #[test]
    fn test_billing_period_rescale_preserves_rate() {
        let mut mgr = VmManager::new(catalog()).unwrap();
        let rate_before = mgr.slowest_vm_type().price_per_second();
        mgr.set_billing_period(60).unwrap();
        let slow = mgr.slowest_vm_type();
        assert_eq!(slow.billing_period_s, 60);
        assert!((slow.price_per_second() - rate_before).abs() < 1e-12);

        // Rescaling after a VM exists is a configuration error.
        let slow = slow.clone();
        mgr.init_vm(&slow);
        assert!(mgr.set_billing_period(3600).is_err());
    }

    #[test]
    fn test_idle_index_tracks_lifecycle() {
        let wf = WorkflowId::new();
        let mut mgr = VmManager::new(catalog()).unwrap();
        let mut collector = MetricCollector::new("test");

        let slow = mgr.slowest_vm_type().clone();
        let vm_id = mgr.init_vm(&slow);
        assert!(mgr.idle_vms().is_empty());

        mgr.provision_vm(vm_id, SimTime::ZERO).unwrap();
        assert_eq!(mgr.idle_vms(), vec![vm_id]);

        mgr.reserve_vm(vm_id, wf, 0).unwrap();
        assert!(mgr.idle_vms().is_empty());
        assert_eq!(mgr.vm(vm_id).unwrap().state, VmState::Busy);

        mgr.release_vm(vm_id, SimTime::from_secs(10.0)).unwrap();
        assert_eq!(mgr.idle_vms(), vec![vm_id]);

        mgr.shutdown_vm(SimTime::from_secs(20.0), vm_id, &mut collector)
            .unwrap();
        assert!(mgr.idle_vms().is_empty());
        assert_eq!(collector.removed_vms, 1);
        assert_eq!(collector.cost, 1.0);
    }

    #[test]
    fn test_only_provisioned_vms_are_idle() {
        let wf = WorkflowId::new();
        let mut mgr = VmManager::new(catalog()).unwrap();
        let slow = mgr.slowest_vm_type().clone();
        let a = mgr.init_vm(&slow);
        let b = mgr.init_vm(&slow);
        mgr.provision_vm(a, SimTime::ZERO).unwrap();
        mgr.provision_vm(b, SimTime::ZERO).unwrap();
        mgr.reserve_vm(a, wf, 0).unwrap();

        for id in mgr.idle_vms() {
            assert_eq!(mgr.vm(id).unwrap().state, VmState::Provisioned);
        }
    }

    #[test]
    fn test_idle_filters_union() {
        let wf = WorkflowId::new();
        let mut mgr = VmManager::new(catalog()).unwrap();
        let slow = mgr.slowest_vm_type().clone();
        let with_files = mgr.init_vm(&slow);
        let with_container = mgr.init_vm(&slow);
        let bare = mgr.init_vm(&slow);
        for id in [with_files, with_container, bare] {
            mgr.provision_vm(id, SimTime::ZERO).unwrap();
        }

        let container = Container::new(wf, 60);
        let file = File::new("chunk_0", 125);
        mgr.vm_mut(with_files).unwrap().add_files([file.clone()]);
        mgr.vm_mut(with_container)
            .unwrap()
            .add_container(container.clone());

        let task = Task::new(wf, 0, "t", vec![], vec![file], vec![], 1.0, container.clone());

        let by_files = mgr.idle_vms_for(Some(&task), None);
        assert_eq!(by_files, vec![with_files]);

        let by_container = mgr.idle_vms_for(None, Some(&container));
        assert_eq!(by_container, vec![with_container]);

        let union = mgr.idle_vms_for(Some(&task), Some(&container));
        assert_eq!(union, vec![with_files, with_container]);
    }

    #[test]
    fn test_shutdown_idle_vms_counts_leftovers() {
        let mut mgr = VmManager::new(catalog()).unwrap();
        let mut collector = MetricCollector::new("test");
        let slow = mgr.slowest_vm_type().clone();
        for _ in 0..3 {
            let id = mgr.init_vm(&slow);
            mgr.provision_vm(id, SimTime::ZERO).unwrap();
        }
        let left = mgr
            .shutdown_idle_vms(SimTime::from_secs(100.0), &mut collector)
            .unwrap();
        assert_eq!(left, 3);
        assert_eq!(collector.removed_vms, 3);
        assert_eq!(collector.cost, 3.0);
    }
}
