//! Shared storage service
//!
//! A single S3-like storage shared by every VM. Capacity is unbounded; only
//! read and write bandwidth are modeled.

use serde::{Deserialize, Serialize};

/// Shared storage with bounded read/write throughput
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Storage {
    /// Read rate in megabits per second
    pub read_rate_mbps: f64,
    /// Write rate in megabits per second
    pub write_rate_mbps: f64,
}

impl Storage {
    /// Create a storage with the given rates
    pub fn new(read_rate_mbps: f64, write_rate_mbps: f64) -> Self {
        Self {
            read_rate_mbps,
            write_rate_mbps,
        }
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self::new(1000.0, 1000.0)
    }
}

/// Holder of the single shared storage instance
#[derive(Debug, Clone, Copy, Default)]
pub struct StorageManager {
    storage: Storage,
}

impl StorageManager {
    /// Create a manager over a storage instance
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// The shared storage
    pub fn storage(&self) -> Storage {
        self.storage
    }
}
