//! VM types and catalog ingestion

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{SimResult, SimulatorError};

/// A leasable machine type from the provider catalog.
///
/// Immutable after catalog load, except for the uniform billing-period
/// rescale applied by the manager at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmType {
    /// Provider SKU name
    pub name: String,
    /// Virtual cores
    pub cpu: u32,
    /// RAM in gigabytes
    pub memory_gb: u32,
    /// Price in dollars per billing period
    pub price_per_period: f64,
    /// Billing period in seconds; any started period is fully charged
    pub billing_period_s: u64,
    /// I/O bandwidth in megabits per second
    pub io_bandwidth_mbps: u32,
}

impl VmType {
    /// Effective price per second, invariant under billing-period rescaling
    pub fn price_per_second(&self) -> f64 {
        self.price_per_period / self.billing_period_s as f64
    }
}

#[derive(Debug, Deserialize)]
struct CatalogDocument {
    vms: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    name: String,
    cpu: u32,
    memory: u32,
    price: f64,
    #[serde(rename = "billingPeriod")]
    billing_period: u64,
    #[serde(rename = "IOBandwidth")]
    io_bandwidth: u32,
    enable: bool,
}

/// Load enabled VM types from catalog JSON, sorted ascending by price
pub fn load_catalog_str(json: &str) -> SimResult<Vec<VmType>> {
    let doc: CatalogDocument = serde_json::from_str(json)?;

    let mut types: Vec<VmType> = doc
        .vms
        .into_iter()
        .filter(|entry| entry.enable)
        .map(|entry| VmType {
            name: entry.name,
            cpu: entry.cpu,
            memory_gb: entry.memory,
            price_per_period: entry.price,
            billing_period_s: entry.billing_period,
            io_bandwidth_mbps: entry.io_bandwidth,
        })
        .collect();

    for ty in &types {
        if ty.billing_period_s == 0 {
            return Err(SimulatorError::BadCatalog(format!(
                "VM type '{}' has a zero billing period",
                ty.name
            )));
        }
        if ty.cpu == 0 || ty.io_bandwidth_mbps == 0 {
            return Err(SimulatorError::BadCatalog(format!(
                "VM type '{}' has zero cpu or I/O bandwidth",
                ty.name
            )));
        }
    }

    types.sort_by(|a, b| {
        a.price_per_period
            .total_cmp(&b.price_per_period)
            .then_with(|| a.name.cmp(&b.name))
    });
    Ok(types)
}

/// Load a catalog from a JSON file
pub fn load_catalog_file(path: impl AsRef<Path>) -> SimResult<Vec<VmType>> {
    let content = std::fs::read_to_string(path)?;
    load_catalog_str(&content)
}
