//! # Error Policy
//!
//! Error handling and backoff logic for the controller watch loop.
//! Reconciliation errors requeue the Chart with a per-Chart Fibonacci backoff;
//! watch stream errors are classified and slowed down before the watch restarts.

use crate::constants;
use crate::controller::reconciler::{BackoffState, Reconciler, ReconcilerError};
use crate::crd::Chart;
use crate::observability;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Requeue a Chart whose reconciliation failed
///
/// Backoff state is tracked per Chart so one failing release does not delay the others.
pub fn handle_reconciliation_error(
    chart: Arc<Chart>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let name = chart.name_any();
    let namespace = chart.namespace().unwrap_or_default();

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.name = %name,
        resource.namespace = %namespace,
        error.kind = error.kind(),
    );
    let _error_guard = error_span.enter();

    error!("Reconciliation error for {}/{}: {}", namespace, name, error);
    observability::metrics::increment_reconciliation_errors();

    let (backoff_seconds, error_count) = match ctx.backoff_states.lock() {
        Ok(mut states) => {
            let state = states.entry(chart.key()).or_insert_with(BackoffState::new);
            state.increment_error();
            (state.backoff.next_backoff_seconds(), state.error_count)
        }
        Err(e) => {
            warn!("Failed to lock backoff_states: {}, using default backoff", e);
            (constants::DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS, 0)
        }
    };

    info!(
        backoff_secs = backoff_seconds,
        error_count, "Requeueing with Fibonacci backoff"
    );
    observability::metrics::increment_requeues_total("error-backoff");
    Action::requeue(Duration::from_secs(backoff_seconds))
}

/// Watch stream failure categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    /// 401: RBAC revoked or token expired
    Unauthorized,
    /// 410: resource version too old
    Expired,
    /// 429: API server storage reinitializing
    Throttled,
    /// Object deleted between event and fetch
    NotFound,
    Other,
}

pub fn classify_watch_error(error: &str) -> WatchErrorKind {
    if error.contains("401") || error.contains("Unauthorized") || error.contains("WatchFailed") {
        WatchErrorKind::Unauthorized
    } else if error.contains("410")
        || error.contains("too old resource version")
        || error.contains("Expired")
        || error.contains("Gone")
    {
        WatchErrorKind::Expired
    } else if error.contains("429")
        || error.contains("storage is (re)initializing")
        || error.contains("TooManyRequests")
    {
        WatchErrorKind::Throttled
    } else if error.contains("ObjectNotFound")
        || (error.contains("404") && error.contains("not found"))
    {
        WatchErrorKind::NotFound
    } else {
        WatchErrorKind::Other
    }
}

/// Log and pace a watch stream error
///
/// Throttling doubles `backoff` (milliseconds) up to `max_backoff_ms`; any other
/// category resets it.
pub async fn handle_watch_stream_error(
    error_string: &str,
    backoff: &Arc<AtomicU64>,
    max_backoff_ms: u64,
) -> WatchErrorKind {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        error = %error_string
    );
    let _error_guard = error_span.enter();

    let kind = classify_watch_error(error_string);
    let restart_delay = Duration::from_secs(constants::DEFAULT_WATCH_RESTART_DELAY_SECS);
    match kind {
        WatchErrorKind::Unauthorized => {
            error!("Watch authentication failed (401 Unauthorized): RBAC may have been revoked or the token expired");
            error!("Check that the controller ServiceAccount can still list charts:");
            error!("  kubectl auth can-i list charts --as=system:serviceaccount:microscaler-system:chart-release-controller --all-namespaces");
            warn!(
                "Waiting {}s before retrying watch",
                constants::DEFAULT_WATCH_RESTART_DELAY_SECS
            );
            tokio::time::sleep(restart_delay).await;
        }
        WatchErrorKind::Expired => {
            warn!(error_type = "410", "Watch resource version expired, watch will restart");
        }
        WatchErrorKind::Throttled => {
            let current = backoff.load(Ordering::Relaxed);
            warn!(
                "API server storage reinitializing (429), backing off for {}ms",
                current
            );
            tokio::time::sleep(Duration::from_millis(current)).await;
            backoff.store(current.saturating_mul(2).min(max_backoff_ms), Ordering::Relaxed);
            return kind;
        }
        WatchErrorKind::NotFound => {
            warn!("Chart not found (likely deleted), continuing watch");
        }
        WatchErrorKind::Other => {
            error!("Controller stream error: {}", error_string);
            tokio::time::sleep(restart_delay).await;
        }
    }
    backoff.store(constants::DEFAULT_WATCH_INITIAL_BACKOFF_MS, Ordering::Relaxed);
    kind
}
