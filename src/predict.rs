//! Task execution-time prediction
//!
//! Translates a (task, VM type, storage, presence-of-inputs) tuple into
//! seconds. Two models are available: pure I/O accounting, and I/O plus the
//! reference runtime scaled by core count.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SimulatorError;
use crate::storage::Storage;
use crate::vm::{Vm, VmState, VmType};
use crate::workflow::Task;

/// Selectable execution-time model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictModel {
    /// Network and disk transfer time only
    IoConsumption,
    /// Transfer time plus `runtime / cpu`
    #[default]
    IoAndRuntime,
}

impl FromStr for PredictModel {
    type Err = SimulatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "io_consumption" => Ok(PredictModel::IoConsumption),
            "io_and_runtime" => Ok(PredictModel::IoAndRuntime),
            other => Err(SimulatorError::InvalidPredictModel(other.to_string())),
        }
    }
}

impl fmt::Display for PredictModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredictModel::IoConsumption => write!(f, "io_consumption"),
            PredictModel::IoAndRuntime => write!(f, "io_and_runtime"),
        }
    }
}

/// Predict the execution time of a task in seconds.
///
/// When a concrete `vm` is given, provisioning delays and storage fetches are
/// skipped for whatever that VM already has (a started lease, the task's
/// container, input files on local disk). Without a VM the prediction is for
/// a fresh instance and pays for everything.
pub fn execution_time(
    model: PredictModel,
    task: &Task,
    vm_type: &VmType,
    storage: Storage,
    vm: Option<&Vm>,
    container_prov_s: f64,
    vm_prov_s: f64,
) -> f64 {
    let mut total = 0.0;

    match vm {
        Some(vm) => {
            if vm.state == VmState::NotProvisioned {
                total += vm_prov_s;
            }
            if !vm.has_container(&task.container) {
                total += container_prov_s;
            }
        }
        None => {
            total += vm_prov_s;
            total += container_prov_s;
        }
    }

    for input in &task.input_files {
        total += input.size_in_megabits() / vm_type.io_bandwidth_mbps as f64;

        let on_vm = vm.is_some_and(|vm| vm.has_files(std::slice::from_ref(input)));
        if !on_vm {
            total += input.size_in_megabits() / storage.read_rate_mbps;
        }
    }

    for output in &task.output_files {
        total += output.size_in_megabits() / vm_type.io_bandwidth_mbps as f64;
        total += output.size_in_megabits() / storage.write_rate_mbps;
    }

    if model == PredictModel::IoAndRuntime {
        total += task.runtime_s / vm_type.cpu as f64;
    }

    total
}
