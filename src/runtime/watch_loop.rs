//! # Watch Loop
//!
//! Drives the kube-runtime controller for Chart resources across all namespaces
//! until SIGTERM/SIGINT.

use crate::constants;
use crate::controller::reconciler::{reconcile, Reconciler};
use crate::controller::server::ServerState;
use crate::crd::Chart;
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use anyhow::Result;
use futures::StreamExt;
use kube::api::Api;
use kube_runtime::controller::{self, Controller};
use kube_runtime::watcher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Run the controller until a shutdown signal arrives
pub async fn run_watch_loop(
    charts: Api<Chart>,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
) -> Result<()> {
    let concurrency = reconciler.config.reconcile_concurrency;
    let watch_backoff = Arc::new(AtomicU64::new(constants::DEFAULT_WATCH_INITIAL_BACKOFF_MS));

    info!(concurrency, "Starting Chart controller");

    Controller::new(charts, watcher::Config::default())
        .with_config(controller::Config::default().concurrency(concurrency))
        .shutdown_on_signal()
        .run(reconcile, handle_reconciliation_error, reconciler)
        .for_each(|result| {
            let watch_backoff = Arc::clone(&watch_backoff);
            async move {
                match result {
                    Ok((chart, action)) => {
                        debug!(chart = %chart, ?action, "Reconciliation completed");
                    }
                    // Already logged and requeued by the error policy
                    Err(controller::Error::ReconcilerFailed(e, chart)) => {
                        debug!(chart = %chart, error = %e, "Reconciliation failed");
                    }
                    Err(e) => {
                        handle_watch_stream_error(
                            &e.to_string(),
                            &watch_backoff,
                            constants::DEFAULT_WATCH_MAX_BACKOFF_MS,
                        )
                        .await;
                    }
                }
            }
        })
        .await;

    server_state.is_ready.store(false, Ordering::Relaxed);
    info!("Chart controller stopped");
    Ok(())
}
