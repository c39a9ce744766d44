//! # Reconciler
//!
//! Entry point kube-runtime calls for every Chart event.
//!
//! - A Chart being deleted runs the delete pass; the finalizer is removed only
//!   when every handler completed.
//! - Any other Chart gets the finalizer and runs the apply pass, then is requeued
//!   for the periodic resync.
//!
//! Errors surface to the error policy, which requeues with a per-Chart backoff.

pub mod types;
pub mod validation;

pub use types::{BackoffState, Reconciler, ReconcilerError};

use crate::config::ControllerConfig;
use crate::constants::{CHART_FINALIZER, DEFAULT_FINALIZER_REQUEUE_SECS};
use crate::controller::pipeline::{Flow, PassEvent, Pipeline};
use crate::controller::resources::{build_handlers, status};
use crate::controller::retry::RetryConfig;
use crate::crd::Chart;
use crate::helm::CredentialPair;
use crate::observability::metrics;
use crate::store::RecordStore;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, info_span, warn, Instrument};

/// What caused a reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    /// Watch event or requeue
    Watch,
    /// Listing existing Charts before the watch starts
    Startup,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Watch => "watch",
            TriggerSource::Startup => "startup",
        }
    }
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn RecordStore>,
        credentials: CredentialPair,
        config: ControllerConfig,
    ) -> Self {
        let pipeline = Pipeline::new(
            build_handlers(&store, &credentials, &config),
            RetryConfig::from_controller_config(&config),
        );
        Self {
            store,
            credentials,
            pipeline,
            config,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn reset_backoff(&self, key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(key) {
                state.reset();
            }
        }
    }

    async fn apply(&self, chart: &Chart) -> Result<Action, ReconcilerError> {
        validation::validate_chart(chart)
            .map_err(|e| ReconcilerError::Validation(e.to_string()))?;

        if !chart.has_finalizer() {
            self.store.add_finalizer(chart, CHART_FINALIZER).await?;
        }

        let outcome = self.pipeline.run(PassEvent::Apply, chart).await?;
        self.reset_backoff(&chart.key());

        if outcome.is_cancelled() {
            info!(
                stopped_by = ?outcome.stopped_by,
                skipped = ?outcome.skipped,
                reason = ?outcome.context.reason(),
                "Pass ended early, waiting for next resync"
            );
            metrics::increment_requeues_total("cancelled");
        } else {
            metrics::increment_requeues_total("resync");
        }
        Ok(Action::requeue(self.config.resync_period()))
    }

    async fn finalize(&self, chart: &Chart) -> Result<Action, ReconcilerError> {
        if !chart.has_finalizer() {
            return Ok(Action::await_change());
        }

        let outcome = self.pipeline.run(PassEvent::Delete, chart).await?;
        if outcome.flow != Flow::Continue {
            info!(
                stopped_by = ?outcome.stopped_by,
                flow = outcome.flow.as_str(),
                "Release not removed yet, keeping finalizer"
            );
            metrics::increment_requeues_total("finalizer-kept");
            return Ok(Action::requeue(Duration::from_secs(
                DEFAULT_FINALIZER_REQUEUE_SECS,
            )));
        }

        self.store.remove_finalizer(chart, CHART_FINALIZER).await?;
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(&chart.key());
        }
        info!("Release removed, finalizer released");
        Ok(Action::await_change())
    }
}

/// Reconcile a Chart in response to a watch event
pub async fn reconcile(chart: Arc<Chart>, ctx: Arc<Reconciler>) -> Result<Action, ReconcilerError> {
    reconcile_with_source(chart, ctx, TriggerSource::Watch).await
}

pub async fn reconcile_with_source(
    chart: Arc<Chart>,
    ctx: Arc<Reconciler>,
    trigger: TriggerSource,
) -> Result<Action, ReconcilerError> {
    let span = info_span!(
        "controller.reconcile",
        resource.name = %chart.name_any(),
        resource.namespace = %chart.namespace().unwrap_or_default(),
        release = %chart.release_name(),
        trigger = trigger.as_str(),
    );

    async move {
        let start = Instant::now();
        metrics::increment_reconciliations();

        let result = if chart.is_deleting() {
            ctx.finalize(&chart).await
        } else {
            ctx.apply(&chart).await
        };
        metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());

        if let Err(ReconcilerError::Unknown(_)) = &result {
            if let Err(e) = status::record_unknown_error(ctx.store.as_ref(), &chart).await {
                warn!(error = %e, "Could not record unknown error on status");
            }
        }
        result
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::resources::test_support::{
        chart, content, test_config, with_values_refs, FakeRecordStore, FakeReleaseClient,
    };
    use crate::crd::status::reasons;
    use crate::helm::{ReleaseClient, ReleaseError, ReleaseStatus};
    use serde_json::json;

    fn reconciler(store: &Arc<FakeRecordStore>, client: &Arc<FakeReleaseClient>) -> Arc<Reconciler> {
        let client: Arc<dyn ReleaseClient> = Arc::clone(client) as Arc<dyn ReleaseClient>;
        Arc::new(Reconciler::new(
            Arc::clone(store) as Arc<dyn RecordStore>,
            CredentialPair::new(Arc::clone(&client), client, "microscaler-system"),
            test_config(),
        ))
    }

    fn with_finalizer(mut c: Chart) -> Chart {
        c.metadata.finalizers = Some(vec![CHART_FINALIZER.to_string()]);
        c
    }

    fn deleting(mut c: Chart) -> Chart {
        c.metadata.deletion_timestamp = Some(
            serde_json::from_value(json!("2024-05-01T10:00:00Z")).expect("valid time"),
        );
        c
    }

    #[test]
    fn test_pipeline_order() {
        let store = Arc::new(FakeRecordStore::default());
        let client = Arc::new(FakeReleaseClient::default());
        let r = reconciler(&store, &client);
        assert_eq!(
            r.pipeline.handler_names(),
            vec!["namespace", "history_guard", "release", "status"]
        );
    }

    #[tokio::test]
    async fn test_apply_pass_installs_and_reports() {
        let c = with_values_refs(chart("nginx", "web"), Some("nginx-values"), Some("nginx-secret"));
        let store = Arc::new(
            FakeRecordStore::default()
                .with_chart(&c)
                .with_config_map("nginx-values", "replicas: 2\n")
                .with_secret("nginx-secret", "replicas: 3\n"),
        );
        let client = Arc::new(FakeReleaseClient::default());

        let action = reconcile(Arc::new(c), reconciler(&store, &client))
            .await
            .expect("reconcile");
        assert_eq!(action, Action::requeue(test_config().resync_period()));

        assert_eq!(client.mutations(), vec!["install web/nginx".to_string()]);
        let stored = store.stored_chart("charts", "nginx").expect("chart");
        assert!(stored.has_finalizer());
        assert!(store.namespace_labels("web").is_some());
        let status = stored.status.expect("status written");
        assert_eq!(status.release.status.as_deref(), Some("deployed"));
    }

    #[tokio::test]
    async fn test_pull_failure_reported_on_status() {
        let c = chart("nginx", "web");
        let store = Arc::new(FakeRecordStore::default().with_chart(&c).with_namespace("web"));
        let client = Arc::new(
            FakeReleaseClient::default().fail_pulls(ReleaseError::PullTimeout("slow".into())),
        );

        reconcile(Arc::new(c), reconciler(&store, &client))
            .await
            .expect("cancelled pass is not an error");
        let status = store
            .stored_chart("charts", "nginx")
            .and_then(|c| c.status)
            .expect("status");
        assert_eq!(status.reason.as_deref(), Some(reasons::CHART_PULL_FAILED));
    }

    #[tokio::test]
    async fn test_invalid_chart_is_not_reconciled() {
        let mut c = chart("nginx", "web");
        c.spec.tarball_url = "not a url".to_string();
        let store = Arc::new(FakeRecordStore::default().with_chart(&c));
        let client = Arc::new(FakeReleaseClient::default());

        let err = reconcile(Arc::new(c), reconciler(&store, &client))
            .await
            .expect_err("invalid");
        assert!(matches!(err, ReconcilerError::Validation(_)));
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_delete_pass_removes_finalizer() {
        let c = deleting(with_finalizer(chart("nginx", "web")));
        let store = Arc::new(FakeRecordStore::default().with_chart(&c));
        let client = Arc::new(
            FakeReleaseClient::default()
                .with_release(content("nginx", "web", ReleaseStatus::Deployed, "1.0.0")),
        );

        let action = reconcile(Arc::new(c), reconciler(&store, &client))
            .await
            .expect("delete");
        assert_eq!(action, Action::await_change());
        assert!(!store
            .stored_chart("charts", "nginx")
            .expect("chart")
            .has_finalizer());
    }

    #[tokio::test]
    async fn test_delete_pass_keeps_finalizer_when_release_remains() {
        let c = deleting(with_finalizer(chart("nginx", "web")));
        let store = Arc::new(FakeRecordStore::default().with_chart(&c));
        let client = Arc::new(
            FakeReleaseClient::default()
                .with_release(content("nginx", "web", ReleaseStatus::Deployed, "1.0.0"))
                .delete_leaves_release(),
        );

        let action = reconcile(Arc::new(c), reconciler(&store, &client))
            .await
            .expect("delete");
        assert_eq!(
            action,
            Action::requeue(Duration::from_secs(DEFAULT_FINALIZER_REQUEUE_SECS))
        );
        assert!(store
            .stored_chart("charts", "nginx")
            .expect("chart")
            .has_finalizer());
    }

    #[tokio::test]
    async fn test_unknown_failure_recorded_on_status() {
        let c = chart("nginx", "web");
        let store = Arc::new(FakeRecordStore::default().with_chart(&c).with_namespace("web"));
        let client = Arc::new(
            FakeReleaseClient::default().fail_operations(ReleaseError::Other("boom".into()), None),
        );

        let err = reconcile(Arc::new(c), reconciler(&store, &client))
            .await
            .expect_err("unknown");
        assert!(matches!(err, ReconcilerError::Unknown(_)));
        let status = store
            .stored_chart("charts", "nginx")
            .and_then(|c| c.status)
            .expect("status");
        assert_eq!(status.reason.as_deref(), Some(reasons::UNKNOWN_ERROR));
    }
}
