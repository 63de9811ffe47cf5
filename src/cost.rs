//! Billing-period arithmetic
//!
//! VMs are charged per billing period; any started period is fully paid.
//! Period counts always use an explicit ceiling.

use crate::error::{SimResult, SimulatorError};
use crate::time::SimTime;
use crate::vm::{Vm, VmType};

fn full_periods(use_time_s: f64, billing_period_s: u64) -> f64 {
    (use_time_s / billing_period_s as f64).ceil()
}

fn lease_start(vm: &Vm) -> SimResult<SimTime> {
    vm.start_time
        .ok_or_else(|| SimulatorError::InvalidStateTransition {
            from: vm.state.to_string(),
            to: "priced".to_string(),
        })
}

/// Price of running a provisioned VM for `use_time_s` more seconds from `now`.
///
/// `remainder = elapsed mod period` counts as already-paid time: a use that
/// fits within it is free, and only the overhang is charged in whole periods.
pub fn calculate_price_for_vm(now: SimTime, use_time_s: f64, vm: &Vm) -> SimResult<f64> {
    let elapsed = now.duration_since(lease_start(vm)?);
    let remainder_of_last_period = elapsed % vm.vm_type.billing_period_s as f64;

    if use_time_s <= remainder_of_last_period {
        return Ok(0.0);
    }

    let leftover = use_time_s - remainder_of_last_period;
    Ok(full_periods(leftover, vm.vm_type.billing_period_s) * vm.vm_type.price_per_period)
}

/// Price of running a fresh VM of a type for `use_time_s` seconds
pub fn estimate_price_for_vm_type(use_time_s: f64, vm_type: &VmType) -> f64 {
    if use_time_s <= 0.0 {
        return 0.0;
    }
    full_periods(use_time_s, vm_type.billing_period_s) * vm_type.price_per_period
}

/// Seconds until the VM's next billing-period boundary
pub fn time_until_next_billing_period(now: SimTime, vm: &Vm) -> SimResult<f64> {
    let elapsed = now.duration_since(lease_start(vm)?);
    let period = vm.vm_type.billing_period_s as f64;
    Ok(period - elapsed % period)
}
