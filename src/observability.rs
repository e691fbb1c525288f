//! Tracing/logging initialization.
//!
//! The ledger emits `tracing` events for postings, reversals, costing and,
//! most importantly, auto-provisioned accounts. Embedding applications that
//! already install a subscriber can skip this.

use tracing_subscriber::EnvFilter;

/// Initialize JSON logging, filtered through `RUST_LOG` (default `info`).
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}
