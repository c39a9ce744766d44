//! # Controller Metrics
//!
//! Metrics for controller operations: reconciliations, requeues and pipeline handlers.

use crate::observability::metrics::registry::REGISTRY;
use anyhow::Result;
use prometheus::{Histogram, HistogramVec, IntCounter, IntCounterVec};
use std::sync::LazyLock;

// Controller reconciliation metrics
static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "chart_release_reconciliations_total",
        "Total number of Chart reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "chart_release_reconciliation_errors_total",
        "Total number of reconciliation errors",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "chart_release_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

// Requeue metrics
static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "chart_release_requeues_total",
            "Total number of reconciliation requeues",
        ),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

// Pipeline handler metrics
static HANDLER_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "chart_release_handler_duration_seconds",
            "Duration of a pipeline handler including in-pass retries",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]),
        &["resource"],
    )
    .expect("Failed to create HANDLER_DURATION metric - this should never happen")
});

static HANDLER_OUTCOMES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "chart_release_handler_outcomes_total",
            "Pipeline handler results by flow outcome",
        ),
        &["resource", "outcome"],
    )
    .expect("Failed to create HANDLER_OUTCOMES_TOTAL metric - this should never happen")
});

/// Register controller metrics with the registry
pub(crate) fn register_controller_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(HANDLER_DURATION.clone()))?;
    REGISTRY.register(Box::new(HANDLER_OUTCOMES_TOTAL.clone()))?;
    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_requeues_total(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}

pub fn observe_handler_duration(resource: &str, duration: f64) {
    HANDLER_DURATION.with_label_values(&[resource]).observe(duration);
}

/// `outcome` is a flow name (`continue`, `skip`, ...) or `error`
pub fn increment_handler_outcome(resource: &str, outcome: &str) {
    HANDLER_OUTCOMES_TOTAL
        .with_label_values(&[resource, outcome])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_reconciliations() {
        let before = RECONCILIATIONS_TOTAL.get();
        increment_reconciliations();
        let after = RECONCILIATIONS_TOTAL.get();
        assert!(after >= before + 1u64);
    }

    #[test]
    fn test_increment_requeues_by_reason() {
        let before = REQUEUES_TOTAL.with_label_values(&["test-reason"]).get();
        increment_requeues_total("test-reason");
        let after = REQUEUES_TOTAL.with_label_values(&["test-reason"]).get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_handler_outcome_labels() {
        increment_handler_outcome("test-handler", "skip");
        assert_eq!(
            HANDLER_OUTCOMES_TOTAL
                .with_label_values(&["test-handler", "skip"])
                .get(),
            1
        );
        observe_handler_duration("test-handler", 0.2);
        assert_eq!(
            HANDLER_DURATION
                .with_label_values(&["test-handler"])
                .get_sample_count(),
            1
        );
    }
}
