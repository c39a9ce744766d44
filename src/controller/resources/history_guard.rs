//! # Release History Guard
//!
//! Helm's history limit counts failed attempts like any other revision, so a
//! release that keeps failing fills its history with failures and blocks
//! further upgrades. When the latest revisions are all failed, the guard flags
//! the pass (the release step then skips the upgrade) and prunes the storage
//! record of the oldest of them once it is old enough.

use crate::constants::{FAILED_REVISION_MIN_AGE_SECS, MAX_FAILED_REVISIONS};
use crate::controller::context::PassContext;
use crate::controller::pipeline::{Flow, Handler};
use crate::controller::reconciler::ReconcilerError;
use crate::crd::Chart;
use crate::helm::{CredentialPair, ReleaseHistoryEntry, ReleaseStatus};
use crate::observability::metrics;
use crate::store::{RecordStore, ReleaseRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct HistoryGuard {
    store: Arc<dyn RecordStore>,
    credentials: CredentialPair,
}

impl HistoryGuard {
    pub fn new(store: Arc<dyn RecordStore>, credentials: CredentialPair) -> Self {
        Self { store, credentials }
    }
}

/// Oldest of the latest `n` revisions when every one of them failed
pub fn failed_streak_oldest(
    history: &[ReleaseHistoryEntry],
    n: usize,
) -> Option<&ReleaseHistoryEntry> {
    if n == 0 || history.len() < n {
        return None;
    }
    let mut latest: Vec<&ReleaseHistoryEntry> = history.iter().collect();
    latest.sort_by(|a, b| b.revision.cmp(&a.revision));
    latest.truncate(n);
    if latest.iter().all(|e| e.status == ReleaseStatus::Failed) {
        latest.last().copied()
    } else {
        None
    }
}

/// Whether `created` is at least `min_age_secs` before `now`; unknown age is never old enough
pub fn is_old_enough(created: Option<DateTime<Utc>>, now: DateTime<Utc>, min_age_secs: i64) -> bool {
    created.is_some_and(|c| (now - c).num_seconds() >= min_age_secs)
}

/// Storage record backing `revision`
pub fn record_for_revision(records: &[ReleaseRecord], revision: i64) -> Option<&ReleaseRecord> {
    records.iter().find(|r| r.revision == revision)
}

#[async_trait]
impl Handler for HistoryGuard {
    fn name(&self) -> &'static str {
        "history_guard"
    }

    async fn ensure_created(
        &self,
        chart: &Chart,
        ctx: &mut PassContext,
    ) -> Result<Flow, ReconcilerError> {
        let namespace = chart.release_namespace();
        let release = chart.release_name();

        let history = match self
            .credentials
            .select(chart)
            .get_history(namespace, release)
            .await
        {
            Ok(history) => history,
            Err(e) if e.is_not_found() => return Ok(Flow::Continue),
            Err(e) => return Err(e.into()),
        };

        let Some(oldest) = failed_streak_oldest(&history, MAX_FAILED_REVISIONS) else {
            return Ok(Flow::Continue);
        };
        ctx.mark_failed_max_attempts();
        warn!(
            release = %release,
            failed = MAX_FAILED_REVISIONS,
            oldest_revision = oldest.revision,
            "Latest revisions all failed"
        );

        let selector = format!("owner=helm,name={release}");
        let records = self.store.list_release_records(namespace, &selector).await?;
        let Some(record) = record_for_revision(&records, oldest.revision) else {
            debug!(
                "No storage record for revision {} of {}",
                oldest.revision, release
            );
            return Ok(Flow::Continue);
        };

        let created = record.created.or(oldest.last_deployed);
        if !is_old_enough(created, Utc::now(), FAILED_REVISION_MIN_AGE_SECS) {
            info!(
                release = %release,
                revision = oldest.revision,
                "Failed revision too recent to prune"
            );
            return Ok(Flow::Continue);
        }

        match self.store.delete_release_record(namespace, &record.name).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        info!(
            release = %release,
            revision = oldest.revision,
            record = %record.name,
            "Pruned failed revision"
        );
        metrics::increment_pruned_revisions();
        ctx.clear_failed_max_attempts();
        Ok(Flow::Continue)
    }

    async fn ensure_deleted(
        &self,
        _chart: &Chart,
        _ctx: &mut PassContext,
    ) -> Result<Flow, ReconcilerError> {
        Ok(Flow::Continue)
    }
}
