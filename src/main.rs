//! # Chart Release Controller
//!
//! A Kubernetes controller that turns `Chart` resources into Helm releases.
//!
//! ## Overview
//!
//! Every Chart event runs a pass through an ordered pipeline:
//!
//! 1. **namespace** - create the release namespace when missing
//! 2. **history_guard** - prune runs of failed revisions that would block upgrades
//! 3. **release** - install, upgrade, roll back or uninstall the release
//! 4. **status** - write the observed release state back to the Chart
//!
//! ## Features
//!
//! - **Values merging**: override values from a ConfigMap and a Secret, Secret wins
//! - **Drift detection**: upgrades only when chart version or values checksum changed
//! - **Bounded waits**: long installs continue in the background, the pass moves on
//! - **Cordon**: annotations pause a Chart without deleting it
//! - **Prometheus metrics** and **health probes** on the metrics port

use anyhow::Result;
use chart_release_controller::runtime::{initialize, run_watch_loop};

#[tokio::main]
async fn main() -> Result<()> {
    let init_result = initialize().await?;

    run_watch_loop(
        init_result.charts,
        init_result.reconciler,
        init_result.server_state,
    )
    .await
}
