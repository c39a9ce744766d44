//! # Status Resource
//!
//! Writes the observed release state to the Chart's status subresource.
//!
//! The release manager's view is the baseline. Signals recorded in the pass
//! context (pull failures, rejected manifests, cordons) override it because the
//! release manager never sees them. The Chart is re-read first so the write
//! carries a fresh `resourceVersion`, and nothing is written when the status
//! would not change.

use crate::controller::context::PassContext;
use crate::controller::pipeline::{Flow, Handler};
use crate::controller::reconciler::ReconcilerError;
use crate::controller::resources::chart_coordinates;
use crate::crd::status::{format_last_deployed, reasons};
use crate::crd::{Chart, ChartStatus, ReleaseInfo};
use crate::helm::{CredentialPair, ReleaseContent, ReleaseStatus};
use crate::store::RecordStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug)]
pub struct StatusResource {
    store: Arc<dyn RecordStore>,
    credentials: CredentialPair,
}

impl StatusResource {
    pub fn new(store: Arc<dyn RecordStore>, credentials: CredentialPair) -> Self {
        Self { store, credentials }
    }
}

/// Status for the observed release, with pass-context overrides applied
pub fn desired_status(
    content: Option<&ReleaseContent>,
    last_deployed: Option<DateTime<Utc>>,
    ctx: &PassContext,
) -> ChartStatus {
    let mut status = match content {
        Some(c) => ChartStatus {
            app_version: c.app_version.clone(),
            reason: (c.status != ReleaseStatus::Deployed && !c.description.is_empty())
                .then(|| c.description.clone()),
            release: ReleaseInfo {
                last_deployed: last_deployed.map(format_last_deployed),
                revision: Some(c.revision),
                status: Some(c.status.as_str().to_string()),
            },
            version: Some(c.version.clone()),
        },
        None => ChartStatus {
            release: ReleaseInfo {
                status: Some(reasons::NOT_INSTALLED.to_string()),
                ..ReleaseInfo::default()
            },
            ..ChartStatus::default()
        },
    };

    if let Some(release_status) = ctx.release_status() {
        status.release.status = Some(release_status.to_string());
    }
    if let Some(reason) = ctx.reason() {
        status.reason = Some(reason.to_string());
    }
    status
}

/// Replace the status unless the stored one is already equivalent
async fn write_if_changed(
    store: &dyn RecordStore,
    chart: &Chart,
    desired: ChartStatus,
) -> Result<bool, ReconcilerError> {
    let current = chart.status.clone().unwrap_or_default();
    if current.equivalent(&desired) {
        return Ok(false);
    }
    store.replace_chart_status(chart, desired).await?;
    Ok(true)
}

/// Record `unknown-error` on a Chart whose pass failed outright
pub async fn record_unknown_error(
    store: &dyn RecordStore,
    chart: &Chart,
) -> Result<(), ReconcilerError> {
    let (namespace, name) = chart_coordinates(chart);
    let fresh = store.get_chart(&namespace, &name).await?;
    let mut desired = fresh.status.clone().unwrap_or_default();
    desired.reason = Some(reasons::UNKNOWN_ERROR.to_string());
    desired.release.status = Some(reasons::UNKNOWN_ERROR.to_string());
    write_if_changed(store, &fresh, desired).await?;
    Ok(())
}

#[async_trait]
impl Handler for StatusResource {
    fn name(&self) -> &'static str {
        "status"
    }

    async fn ensure_created(
        &self,
        chart: &Chart,
        ctx: &mut PassContext,
    ) -> Result<Flow, ReconcilerError> {
        let (namespace, name) = chart_coordinates(chart);
        let fresh = self.store.get_chart(&namespace, &name).await?;
        let client = self.credentials.select(&fresh);

        let content = match client
            .get_content(fresh.release_namespace(), fresh.release_name())
            .await
        {
            Ok(content) => Some(content),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };

        let last_deployed = if content.is_some() {
            match client
                .get_history(fresh.release_namespace(), fresh.release_name())
                .await
            {
                Ok(history) => history
                    .iter()
                    .max_by_key(|e| e.revision)
                    .and_then(|e| e.last_deployed),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e.into()),
            }
        } else {
            None
        };

        let desired = desired_status(content.as_ref(), last_deployed, ctx);
        let status = desired.release.status.clone().unwrap_or_default();
        if write_if_changed(self.store.as_ref(), &fresh, desired).await? {
            info!(chart = %fresh.key(), status = %status, "Updated Chart status");
        } else {
            debug!("Status of {} unchanged", fresh.key());
        }
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
