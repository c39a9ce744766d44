//! Install, upgrade and uninstall.
//!
//! Install and upgrade run in their own task. The pass waits for the task up to
//! the configured release wait; past that it records the checksum and moves on
//! while the operation keeps running. The next pass sees the outcome through
//! the current-state read.

use super::state::ReleaseState;
use super::ReleaseResource;
use crate::constants::{ANNOTATION_ROLLBACK_COUNT, ANNOTATION_VALUES_CHECKSUM};
use crate::controller::context::PassContext;
use crate::controller::pipeline::Flow;
use crate::controller::reconciler::ReconcilerError;
use crate::controller::resources::chart_coordinates;
use crate::controller::retry::{retry_with_backoff, RetryConfig};
use crate::crd::status::reasons;
use crate::crd::Chart;
use crate::helm::{InstallRequest, ReleaseClient, ReleaseError, ReleaseStatus, UpdateRequest};
use crate::observability::metrics;
use crate::store::StoreError;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Operation {
    Install,
    Upgrade,
}

impl Operation {
    fn as_str(self) -> &'static str {
        match self {
            Operation::Install => "install",
            Operation::Upgrade => "upgrade",
        }
    }
}

impl ReleaseResource {
    pub(super) async fn apply_release(
        &self,
        chart: &Chart,
        ctx: &mut PassContext,
        operation: Operation,
        desired: ReleaseState,
    ) -> Result<Flow, ReconcilerError> {
        let op = operation.as_str();
        let client = self.credentials.select(chart);
        let namespace = chart.release_namespace().to_string();
        let release = chart.release_name().to_string();

        let archive = match self.fetch_archive(client.as_ref(), chart).await {
            Ok(path) => path,
            Err(e) if e.is_pull_failure() => {
                warn!(
                    release = %release,
                    url = %chart.spec.tarball_url,
                    error = %e,
                    "Chart archive unavailable"
                );
                metrics::increment_release_operations(op, e.kind());
                ctx.set_status(reasons::CHART_PULL_FAILED, reasons::CHART_PULL_FAILED);
                return Ok(Flow::Skip);
            }
            Err(e) => return Err(e.into()),
        };

        let checksum = desired.values_checksum.clone();
        let task_client = Arc::clone(&client);
        let handle = match operation {
            Operation::Install => {
                let request = InstallRequest {
                    archive,
                    namespace: namespace.clone(),
                    release: release.clone(),
                    values: desired.values,
                    skip_crds: chart.spec.install.as_ref().is_some_and(|o| o.skip_crds),
                    timeout: self.install_timeout(chart),
                };
                tokio::spawn(async move { task_client.install(request).await })
            }
            Operation::Upgrade => {
                let request = UpdateRequest {
                    archive,
                    namespace: namespace.clone(),
                    release: release.clone(),
                    values: desired.values,
                    force: chart.force_upgrade(),
                    timeout: self.upgrade_timeout(chart),
                };
                tokio::spawn(async move { task_client.update(request).await })
            }
        };

        info!(
            release = %release,
            namespace = %namespace,
            operation = op,
            version = %desired.version,
            "Release operation started"
        );
        let started = Instant::now();
        let wait = self.config.release_wait();

        // The task is not aborted on expiry; dropping the handle detaches it
        let result = match tokio::time::timeout(wait, handle).await {
            Err(_) => {
                info!(
                    release = %release,
                    operation = op,
                    wait_secs = wait.as_secs(),
                    "Release operation still running, continuing next pass"
                );
                self.record_checksum(chart, &checksum, false).await?;
                metrics::increment_release_operations(op, "in_flight");
                return Ok(Flow::Continue);
            }
            Ok(Err(join_error)) => {
                return Err(ReconcilerError::Unknown(format!(
                    "{op} task for {namespace}/{release} did not complete: {join_error}"
                )));
            }
            Ok(Ok(result)) => result,
        };
        metrics::observe_release_operation_duration(op, started.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                info!(release = %release, operation = op, "Release operation succeeded");
                self.record_checksum(chart, &checksum, true).await?;
                metrics::increment_release_operations(op, "success");
                Ok(Flow::Continue)
            }
            Err(e) => self.record_failure(chart, ctx, client.as_ref(), op, e).await,
        }
    }

    /// Pull the archive and check what it contains
    async fn fetch_archive(
        &self,
        client: &dyn ReleaseClient,
        chart: &Chart,
    ) -> Result<PathBuf, ReleaseError> {
        let path = client.pull_archive(&chart.spec.tarball_url).await?;
        let metadata = client.load_archive(&path).await?;
        if metadata.version != chart.spec.version {
            warn!(
                release = %chart.release_name(),
                declared = %chart.spec.version,
                archive = %metadata.version,
                "Chart archive version differs from the declared version"
            );
        }
        debug!(
            "Loaded chart {} {} from {}",
            metadata.name,
            metadata.version,
            path.display()
        );
        Ok(path)
    }

    /// Classified failures are recorded and skip the rest of the release step;
    /// anything else is judged by what the release manager left behind.
    async fn record_failure(
        &self,
        chart: &Chart,
        ctx: &mut PassContext,
        client: &dyn ReleaseClient,
        op: &'static str,
        failure: ReleaseError,
    ) -> Result<Flow, ReconcilerError> {
        if let Some(marker) = failure.status_reason() {
            warn!(
                release = %chart.release_name(),
                operation = op,
                reason = marker,
                error = %failure,
                "Release operation rejected"
            );
            metrics::increment_release_operations(op, failure.kind());
            ctx.set_status(marker, marker);
            return Ok(Flow::Skip);
        }

        match client
            .get_content(chart.release_namespace(), chart.release_name())
            .await
        {
            Ok(content) if content.status == ReleaseStatus::Failed => {
                warn!(
                    release = %chart.release_name(),
                    operation = op,
                    description = %content.description,
                    "Release failed"
                );
                metrics::increment_release_operations(op, "failed");
                ctx.set_status(content.description, ReleaseStatus::Failed.as_str());
                Ok(Flow::Skip)
            }
            _ => {
                error!(
                    release = %chart.release_name(),
                    operation = op,
                    error = %failure,
                    "Release operation failed for an unknown reason"
                );
                metrics::increment_release_operations(op, "unknown_error");
                ctx.set_status(reasons::UNKNOWN_ERROR, reasons::UNKNOWN_ERROR);
                Err(ReconcilerError::Unknown(failure.to_string()))
            }
        }
    }

    /// Store the applied checksum, optionally resetting the rollback counter.
    ///
    /// The operation has already been issued, so the write is retried here and
    /// a final failure is not retryable by the pipeline.
    async fn record_checksum(
        &self,
        chart: &Chart,
        checksum: &str,
        clear_rollbacks: bool,
    ) -> Result<(), ReconcilerError> {
        let mut annotations = BTreeMap::new();
        annotations.insert(
            ANNOTATION_VALUES_CHECKSUM.to_string(),
            (!checksum.is_empty()).then(|| checksum.to_string()),
        );
        if clear_rollbacks && chart.rollback_count() > 0 {
            annotations.insert(ANNOTATION_ROLLBACK_COUNT.to_string(), None);
        }
        let (namespace, name) = chart_coordinates(chart);
        let retry = RetryConfig::from_controller_config(&self.config);

        retry_with_backoff(&retry, "record_checksum", StoreError::is_transient, || {
            self.store
                .patch_chart_annotations(&namespace, &name, annotations.clone())
        })
        .await
        .map_err(|e| {
            error!(
                chart = %chart.key(),
                error = %e,
                "Release applied but checksum annotation not stored"
            );
            ReconcilerError::ChecksumNotRecorded(format!("{namespace}/{name}: {e}"))
        })
    }

    pub(super) async fn uninstall(
        &self,
        chart: &Chart,
        current: &ReleaseState,
    ) -> Result<Flow, ReconcilerError> {
        let client = self.credentials.privileged();
        let namespace = chart.release_namespace();

        match client
            .delete(namespace, &current.name, self.uninstall_timeout(chart))
            .await
        {
            Ok(()) => info!(release = %current.name, namespace = %namespace, "Release uninstalled"),
            Err(e) if e.is_not_found() => debug!("Release {} already gone", current.name),
            Err(e) => {
                metrics::increment_release_operations("uninstall", e.kind());
                return Err(e.into());
            }
        }

        match client.get_content(namespace, &current.name).await {
            Err(e) if e.is_not_found() => {
                metrics::increment_release_operations("uninstall", "success");
                Ok(Flow::Continue)
            }
            Ok(content) => {
                warn!(
                    release = %current.name,
                    status = %content.status,
                    "Release still present after uninstall, keeping finalizer"
                );
                metrics::increment_release_operations("uninstall", "pending");
                Ok(Flow::KeepFinalizer)
            }
            Err(e) => Err(e.into()),
        }
    }
}
