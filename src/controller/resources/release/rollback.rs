//! Bounded rollback of a release stuck in a transitional status.

use super::state::ReleaseState;
use super::ReleaseResource;
use crate::constants::ANNOTATION_ROLLBACK_COUNT;
use crate::controller::reconciler::ReconcilerError;
use crate::controller::resources::chart_coordinates;
use crate::crd::Chart;
use crate::helm::ReleaseStatus;
use crate::observability::metrics;
use std::collections::BTreeMap;
use tracing::{info, warn};

impl ReleaseResource {
    /// Roll the release back one revision, or remove it when it never finished installing
    ///
    /// The attempt counter is persisted before acting so a failed attempt still counts.
    pub(super) async fn rollback(
        &self,
        chart: &Chart,
        current: &ReleaseState,
    ) -> Result<(), ReconcilerError> {
        let attempts = chart.rollback_count();
        if attempts >= self.config.max_rollbacks {
            warn!(
                release = %current.name,
                attempts = attempts,
                max = self.config.max_rollbacks,
                "Rollback limit reached, leaving release for an operator"
            );
            metrics::increment_rollbacks("exhausted");
            return Ok(());
        }

        let (namespace, name) = chart_coordinates(chart);
        let mut annotations = BTreeMap::new();
        annotations.insert(
            ANNOTATION_ROLLBACK_COUNT.to_string(),
            Some((attempts + 1).to_string()),
        );
        self.store
            .patch_chart_annotations(&namespace, &name, annotations)
            .await?;

        let release_namespace = chart.release_namespace();

        if current.status == ReleaseStatus::PendingInstall {
            info!(release = %current.name, "Removing release that never finished installing");
            match self
                .credentials
                .privileged()
                .delete(release_namespace, &current.name, self.uninstall_timeout(chart))
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
            metrics::increment_rollbacks("deleted");
            return Ok(());
        }

        let client = self.credentials.select(chart);
        let history = client.get_history(release_namespace, &current.name).await?;
        let Some(latest) = history.iter().map(|entry| entry.revision).max() else {
            warn!(release = %current.name, "Release has no history to roll back");
            return Ok(());
        };
        let target = latest - 1;
        if target < 1 {
            warn!(
                release = %current.name,
                revision = latest,
                "No earlier revision to roll back to"
            );
            return Ok(());
        }

        info!(
            release = %current.name,
            from = latest,
            to = target,
            attempt = attempts + 1,
            "Rolling back stuck release"
        );
        client
            .rollback(
                release_namespace,
                &current.name,
                target,
                self.rollback_timeout(chart),
            )
            .await?;
        metrics::increment_rollbacks("rolled_back");
        Ok(())
    }
}
