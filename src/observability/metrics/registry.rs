//! # Metrics Registry
//!
//! Prometheus metrics registry setup and registration.

use anyhow::Result;
use prometheus::Registry;
use std::sync::LazyLock;

/// Global Prometheus metrics registry
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Register all metrics with the Prometheus registry
///
/// Prometheus `Registry::register()` takes ownership, so the statics are cloned.
/// Metrics are `Arc`-backed internally and every clone shares the same values.
#[allow(
    clippy::missing_errors_doc,
    reason = "Only fails on duplicate registration"
)]
pub fn register_metrics() -> Result<()> {
    super::controller_metrics::register_controller_metrics()?;
    super::release_metrics::register_release_metrics()?;
    Ok(())
}
