//! Simulation configuration
//!
//! Driver-facing knobs that mutate the VM manager and scheduler settings,
//! with validation and environment-based overrides.

use serde::{Deserialize, Serialize};

use crate::error::{SimResult, SimulatorError};
use crate::predict::PredictModel;

/// Configuration applied to a simulation before any event is dispatched
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Execution-time prediction model
    pub predict_model: PredictModel,
    /// Uniform VM provisioning delay in seconds
    pub vm_provision_delay_s: f64,
    /// Fraction of a billing period after which idle VMs become
    /// deprovisioning candidates; thresholds derive from `1 − percent`
    pub vm_deprovision_percent: f64,
    /// Uniform billing period override; catalog-native periods when unset
    pub billing_period_s: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            predict_model: PredictModel::default(),
            vm_provision_delay_s: 120.0,
            vm_deprovision_percent: 0.9,
            billing_period_s: None,
        }
    }
}

impl SimulationConfig {
    /// Validate configuration
    pub fn validate(&self) -> SimResult<()> {
        if self.vm_provision_delay_s < 0.0 {
            return Err(SimulatorError::Config(format!(
                "VM provision delay must be non-negative, got {}",
                self.vm_provision_delay_s
            )));
        }
        if !(0.0..=1.0).contains(&self.vm_deprovision_percent) {
            return Err(SimulatorError::Config(format!(
                "VM deprovision percent must be within [0, 1], got {}",
                self.vm_deprovision_percent
            )));
        }
        if self.billing_period_s == Some(0) {
            return Err(SimulatorError::Config(
                "billing period must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Load defaults and apply `CWSIM_*` environment overrides
    pub fn from_env() -> SimResult<Self> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("CWSIM_PREDICT_MODEL") {
            config.predict_model = val.parse()?;
        }
        if let Ok(val) = std::env::var("CWSIM_VM_PROVISION_DELAY_S") {
            config.vm_provision_delay_s = val
                .parse()
                .map_err(|_| SimulatorError::Config(format!("bad provision delay '{}'", val)))?;
        }
        if let Ok(val) = std::env::var("CWSIM_VM_DEPROVISION_PERCENT") {
            config.vm_deprovision_percent = val
                .parse()
                .map_err(|_| SimulatorError::Config(format!("bad deprovision percent '{}'", val)))?;
        }
        if let Ok(val) = std::env::var("CWSIM_BILLING_PERIOD_S") {
            let period = val
                .parse()
                .map_err(|_| SimulatorError::Config(format!("bad billing period '{}'", val)))?;
            config.billing_period_s = Some(period);
        }

        config.validate()?;
        Ok(config)
    }

    /// Deprovision threshold in seconds for a given billing period
    pub fn deprovision_threshold_s(&self, billing_period_s: u64) -> f64 {
        (1.0 - self.vm_deprovision_percent) * billing_period_s as f64
    }
}
