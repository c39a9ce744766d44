//! # Release Metrics
//!
//! Metrics for release manager operations, rollbacks and failed-revision pruning.

use crate::observability::metrics::registry::REGISTRY;
use anyhow::Result;
use prometheus::{HistogramVec, IntCounter, IntCounterVec};
use std::sync::LazyLock;

static RELEASE_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "chart_release_operations_total",
            "Release manager operations by operation and result",
        ),
        &["operation", "result"],
    )
    .expect("Failed to create RELEASE_OPERATIONS_TOTAL metric - this should never happen")
});

static RELEASE_OPERATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "chart_release_operation_duration_seconds",
            "Duration of release manager operations that finished within the pass",
        )
        .buckets(vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
        &["operation"],
    )
    .expect("Failed to create RELEASE_OPERATION_DURATION metric - this should never happen")
});

static ROLLBACKS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "chart_release_rollbacks_total",
            "Forced rollbacks by result (rolled_back, deleted, exhausted)",
        ),
        &["result"],
    )
    .expect("Failed to create ROLLBACKS_TOTAL metric - this should never happen")
});

static PRUNED_REVISIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "chart_release_pruned_revisions_total",
        "Failed release revisions removed from release storage",
    )
    .expect("Failed to create PRUNED_REVISIONS_TOTAL metric - this should never happen")
});

pub(crate) fn register_release_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RELEASE_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RELEASE_OPERATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(ROLLBACKS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PRUNED_REVISIONS_TOTAL.clone()))?;
    Ok(())
}

pub fn increment_release_operations(operation: &str, result: &str) {
    RELEASE_OPERATIONS_TOTAL
        .with_label_values(&[operation, result])
        .inc();
}

pub fn observe_release_operation_duration(operation: &str, duration: f64) {
    RELEASE_OPERATION_DURATION
        .with_label_values(&[operation])
        .observe(duration);
}

pub fn increment_rollbacks(result: &str) {
    ROLLBACKS_TOTAL.with_label_values(&[result]).inc();
}

pub fn increment_pruned_revisions() {
    PRUNED_REVISIONS_TOTAL.inc();
}
