//! # Release Resource
//!
//! Drives the Helm release a Chart describes.
//!
//! - Current state is the live release plus the checksum annotation on the Chart.
//!   A cordoned Chart stops here and only reports the cordon.
//! - Desired state is the merged override values and the declared chart version,
//!   always targeting `deployed`.
//! - Create installs, update upgrades (or rolls back a stuck release when forced
//!   upgrades are enabled), delete uninstalls with the privileged client.

mod apply;
mod rollback;
pub mod state;
pub mod values;

pub use state::{decide_update, ReleaseState, UpdateDecision};

use crate::config::ControllerConfig;
use crate::controller::context::PassContext;
use crate::controller::pipeline::{CrudResource, Flow, Step};
use crate::controller::reconciler::validation::parse_kubernetes_duration;
use crate::controller::reconciler::ReconcilerError;
use crate::crd::status::reasons;
use crate::crd::Chart;
use crate::helm::{CredentialPair, ReleaseClient, ReleaseStatus};
use crate::store::RecordStore;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct ReleaseResource {
    store: Arc<dyn RecordStore>,
    credentials: CredentialPair,
    config: ControllerConfig,
}

impl ReleaseResource {
    pub fn new(
        store: Arc<dyn RecordStore>,
        credentials: CredentialPair,
        config: ControllerConfig,
    ) -> Self {
        Self {
            store,
            credentials,
            config,
        }
    }

    /// Deletion reads go through the privileged client as well
    fn reader(&self, chart: &Chart) -> Arc<dyn ReleaseClient> {
        if chart.is_deleting() {
            self.credentials.privileged()
        } else {
            self.credentials.select(chart)
        }
    }

    /// Timeout handed to the release manager, falling back to the configured default
    fn operation_timeout(&self, field: &str, value: Option<&str>) -> Duration {
        match value {
            Some(v) => parse_kubernetes_duration(v).unwrap_or_else(|e| {
                warn!(
                    "Ignoring {} '{}': {}. Using default {}s",
                    field, v, e, self.config.default_release_timeout_secs
                );
                self.config.default_release_timeout()
            }),
            None => self.config.default_release_timeout(),
        }
    }

    fn install_timeout(&self, chart: &Chart) -> Duration {
        let value = chart.spec.install.as_ref().and_then(|o| o.timeout.as_deref());
        self.operation_timeout("spec.install.timeout", value)
    }

    fn upgrade_timeout(&self, chart: &Chart) -> Duration {
        let value = chart.spec.upgrade.as_ref().and_then(|o| o.timeout.as_deref());
        self.operation_timeout("spec.upgrade.timeout", value)
    }

    fn rollback_timeout(&self, chart: &Chart) -> Duration {
        let value = chart.spec.rollback.as_ref().and_then(|o| o.timeout.as_deref());
        self.operation_timeout("spec.rollback.timeout", value)
    }

    fn uninstall_timeout(&self, chart: &Chart) -> Duration {
        let value = chart.spec.uninstall.as_ref().and_then(|o| o.timeout.as_deref());
        self.operation_timeout("spec.uninstall.timeout", value)
    }
}

#[async_trait]
impl CrudResource for ReleaseResource {
    type State = ReleaseState;

    fn name(&self) -> &'static str {
        "release"
    }

    async fn current_state(
        &self,
        chart: &Chart,
        ctx: &mut PassContext,
    ) -> Result<Step<Option<ReleaseState>>, ReconcilerError> {
        if let Some(cordon) = chart.cordon() {
            info!(
                release = %chart.release_name(),
                reason = %cordon.reason,
                until = %cordon.until,
                "Chart is cordoned, leaving release untouched"
            );
            ctx.set_status(cordon.reason, reasons::CORDONED);
            let flow = if chart.is_deleting() {
                Flow::KeepFinalizer
            } else {
                Flow::Skip
            };
            return Ok(Step::Stop(flow));
        }

        let content = match self
            .reader(chart)
            .get_content(chart.release_namespace(), chart.release_name())
            .await
        {
            Ok(content) => content,
            Err(e) if e.is_not_found() => {
                debug!("Release {} not found", chart.release_name());
                return Ok(Step::Proceed(None));
            }
            Err(e) => return Err(e.into()),
        };

        if content.status == ReleaseStatus::Failed && self.config.is_protected_release(&content.name)
        {
            warn!(
                release = %content.name,
                "Protected release is failed, refusing to touch it"
            );
            return Ok(Step::Stop(Flow::Cancel));
        }

        Ok(Step::Proceed(Some(ReleaseState::from_content(
            &content,
            chart.values_checksum(),
        ))))
    }

    async fn desired_state(
        &self,
        chart: &Chart,
        _ctx: &mut PassContext,
    ) -> Result<Step<ReleaseState>, ReconcilerError> {
        // Values sources may already be gone while the Chart is being deleted
        let values = if chart.is_deleting() {
            values::Values::new()
        } else {
            values::desired_values(self.store.as_ref(), chart).await?
        };
        Ok(Step::Proceed(ReleaseState {
            name: chart.release_name().to_string(),
            status: ReleaseStatus::Deployed,
            values_checksum: values::values_checksum(&values),
            version: chart.spec.version.clone(),
            values,
        }))
    }

    async fn create_change(
        &self,
        _chart: &Chart,
        _ctx: &mut PassContext,
        current: Option<&ReleaseState>,
        desired: &ReleaseState,
    ) -> Result<Step<Option<ReleaseState>>, ReconcilerError> {
        Ok(Step::Proceed(current.is_none().then(|| desired.clone())))
    }

    async fn update_change(
        &self,
        chart: &Chart,
        ctx: &mut PassContext,
        current: Option<&ReleaseState>,
        desired: &ReleaseState,
    ) -> Result<Step<Option<ReleaseState>>, ReconcilerError> {
        let Some(current) = current else {
            return Ok(Step::Proceed(None));
        };

        match decide_update(
            current,
            desired,
            chart.force_upgrade(),
            ctx.failed_max_attempts(),
        ) {
            UpdateDecision::Rollback => {
                self.rollback(chart, current).await?;
                Ok(Step::Proceed(None))
            }
            UpdateDecision::Defer => {
                info!(
                    release = %current.name,
                    status = %current.status,
                    "Release has an operation in flight, checking again next pass"
                );
                Ok(Step::Proceed(None))
            }
            UpdateDecision::Skip => {
                warn!(
                    release = %current.name,
                    "Latest revisions all failed, not adding another"
                );
                Ok(Step::Proceed(None))
            }
            UpdateDecision::Update => Ok(Step::Proceed(Some(desired.clone()))),
            UpdateDecision::None => Ok(Step::Proceed(None)),
        }
    }

    async fn delete_change(
        &self,
        _chart: &Chart,
        _ctx: &mut PassContext,
        current: Option<&ReleaseState>,
        _desired: &ReleaseState,
    ) -> Result<Step<Option<ReleaseState>>, ReconcilerError> {
        Ok(Step::Proceed(current.cloned()))
    }

    async fn apply_create(
        &self,
        chart: &Chart,
        ctx: &mut PassContext,
        change: ReleaseState,
    ) -> Result<Flow, ReconcilerError> {
        self.apply_release(chart, ctx, apply::Operation::Install, change)
            .await
    }

    async fn apply_update(
        &self,
        chart: &Chart,
        ctx: &mut PassContext,
        current: &ReleaseState,
        change: ReleaseState,
    ) -> Result<Flow, ReconcilerError> {
        debug!(
            from_version = %current.version,
            to_version = %change.version,
            "Upgrading release {}",
            change.name
        );
        self.apply_release(chart, ctx, apply::Operation::Upgrade, change)
            .await
    }

    async fn apply_delete(
        &self,
        chart: &Chart,
        _ctx: &mut PassContext,
        change: ReleaseState,
    ) -> Result<Flow, ReconcilerError> {
        self.uninstall(chart, &change).await
    }
}
