//! Virtual machine model
//!
//! The leased-VM-type catalog, VM instance lifecycles, and the manager that
//! owns every instance and the idle index.

mod instance;
mod manager;
mod vm_type;

pub use instance::{Vm, VmId, VmState};
pub use manager::VmManager;
pub use vm_type::{load_catalog_file, load_catalog_str, VmType};
