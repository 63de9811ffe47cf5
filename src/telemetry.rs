//! Tracing bootstrap
//!
//! Installs a `tracing` subscriber honoring `RUST_LOG`. Drivers call this
//! once; repeated calls are no-ops so tests can share a process.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Initialize the global tracing subscriber, idempotently
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    });
}
