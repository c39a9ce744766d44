//! # Release Manager Adapter
//!
//! Abstraction over the Helm release manager used by the reconciliation pipeline.
//!
//! The controller never speaks Helm's storage or wire format directly. Everything it
//! needs (pull and load chart archives, install/upgrade/uninstall/rollback a release,
//! read release content and history) goes through [`ReleaseClient`].
//!
//! - `cli` - implementation backed by the `helm` binary
//! - `pull` - chart archive download over HTTP
//! - `classify` - maps helm error output to [`ReleaseError`]
//! - `credentials` - privileged/restricted client routing

pub mod classify;
pub mod cli;
pub mod credentials;
pub mod pull;

pub use cli::HelmCli;
pub use credentials::CredentialPair;

use crate::crd::status::reasons;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Release lifecycle status as reported by Helm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReleaseStatus {
    Deployed,
    Failed,
    PendingInstall,
    PendingUpgrade,
    PendingRollback,
    Uninstalling,
    Uninstalled,
    Superseded,
    Unknown,
    NotInstalled,
}

impl ReleaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseStatus::Deployed => "deployed",
            ReleaseStatus::Failed => "failed",
            ReleaseStatus::PendingInstall => "pending-install",
            ReleaseStatus::PendingUpgrade => "pending-upgrade",
            ReleaseStatus::PendingRollback => "pending-rollback",
            ReleaseStatus::Uninstalling => "uninstalling",
            ReleaseStatus::Uninstalled => "uninstalled",
            ReleaseStatus::Superseded => "superseded",
            ReleaseStatus::Unknown => "unknown",
            ReleaseStatus::NotInstalled => "not-installed",
        }
    }

    /// Parse a Helm status string, unrecognised values map to `Unknown`
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "deployed" => ReleaseStatus::Deployed,
            "failed" => ReleaseStatus::Failed,
            "pending-install" => ReleaseStatus::PendingInstall,
            "pending-upgrade" => ReleaseStatus::PendingUpgrade,
            "pending-rollback" => ReleaseStatus::PendingRollback,
            "uninstalling" | "deleting" => ReleaseStatus::Uninstalling,
            "uninstalled" => ReleaseStatus::Uninstalled,
            "superseded" => ReleaseStatus::Superseded,
            "not-installed" => ReleaseStatus::NotInstalled,
            _ => ReleaseStatus::Unknown,
        }
    }

    /// Statuses in which another operation is still in flight
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            ReleaseStatus::PendingInstall
                | ReleaseStatus::PendingUpgrade
                | ReleaseStatus::PendingRollback
                | ReleaseStatus::Uninstalling
        )
    }
}

impl std::fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata read from a chart archive's Chart.yaml
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub app_version: Option<String>,
}

/// Live content of a release
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseContent {
    pub name: String,
    pub namespace: String,
    pub status: ReleaseStatus,
    /// Chart version
    pub version: String,
    pub app_version: Option<String>,
    pub description: String,
    pub revision: i64,
    pub values: serde_json::Map<String, serde_json::Value>,
}

/// A single revision in a release's history
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseHistoryEntry {
    pub revision: i64,
    pub status: ReleaseStatus,
    pub app_version: Option<String>,
    pub version: String,
    pub last_deployed: Option<DateTime<Utc>>,
    pub description: String,
}

/// Parameters for installing a release
#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub archive: PathBuf,
    pub namespace: String,
    pub release: String,
    pub values: serde_json::Map<String, serde_json::Value>,
    pub skip_crds: bool,
    pub timeout: Duration,
}

/// Parameters for upgrading a release
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub archive: PathBuf,
    pub namespace: String,
    pub release: String,
    pub values: serde_json::Map<String, serde_json::Value>,
    pub force: bool,
    pub timeout: Duration,
}

/// Release manager failure classification
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReleaseError {
    #[error("release not found: {0}")]
    ReleaseNotFound(String),
    #[error("resource already exists: {0}")]
    AlreadyExists(String),
    #[error("manifest validation failed: {0}")]
    ValidationFailed(String),
    #[error("values do not meet the chart schema: {0}")]
    ValuesSchemaViolation(String),
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),
    #[error("chart archive not found: {0}")]
    ArchiveNotFound(String),
    #[error("timed out pulling chart archive: {0}")]
    PullTimeout(String),
    #[error("failed to pull chart archive: {0}")]
    PullFailed(String),
    #[error("failed to load chart archive: {0}")]
    ArchiveInvalid(String),
    #[error("release operation timed out: {0}")]
    Timeout(String),
    #[error("failed to execute release manager: {0}")]
    Execution(String),
    #[error("release operation failed: {0}")]
    Other(String),
}

impl ReleaseError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ReleaseError::ReleaseNotFound(_))
    }

    /// Failures pulling or loading the archive
    pub fn is_pull_failure(&self) -> bool {
        matches!(
            self,
            ReleaseError::ArchiveNotFound(_)
                | ReleaseError::PullTimeout(_)
                | ReleaseError::PullFailed(_)
                | ReleaseError::ArchiveInvalid(_)
        )
    }

    /// Deterministic manifest failures recorded on status instead of retried
    pub fn is_manifest_failure(&self) -> bool {
        matches!(
            self,
            ReleaseError::AlreadyExists(_)
                | ReleaseError::ValidationFailed(_)
                | ReleaseError::ValuesSchemaViolation(_)
                | ReleaseError::InvalidManifest(_)
        )
    }

    /// Status marker for classified failures
    pub fn status_reason(&self) -> Option<&'static str> {
        match self {
            ReleaseError::AlreadyExists(_) => Some(reasons::ALREADY_EXISTS),
            ReleaseError::ValidationFailed(_) => Some(reasons::VALIDATION_FAILED),
            ReleaseError::ValuesSchemaViolation(_) => Some(reasons::VALUES_SCHEMA_VIOLATION),
            ReleaseError::InvalidManifest(_) => Some(reasons::INVALID_MANIFEST),
            ReleaseError::ArchiveNotFound(_)
            | ReleaseError::PullTimeout(_)
            | ReleaseError::PullFailed(_)
            | ReleaseError::ArchiveInvalid(_) => Some(reasons::CHART_PULL_FAILED),
            _ => None,
        }
    }

    /// Label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ReleaseError::ReleaseNotFound(_) => "release_not_found",
            ReleaseError::AlreadyExists(_) => "already_exists",
            ReleaseError::ValidationFailed(_) => "validation_failed",
            ReleaseError::ValuesSchemaViolation(_) => "values_schema_violation",
            ReleaseError::InvalidManifest(_) => "invalid_manifest",
            ReleaseError::ArchiveNotFound(_) => "archive_not_found",
            ReleaseError::PullTimeout(_) => "pull_timeout",
            ReleaseError::PullFailed(_) => "pull_failed",
            ReleaseError::ArchiveInvalid(_) => "archive_invalid",
            ReleaseError::Timeout(_) => "timeout",
            ReleaseError::Execution(_) => "execution",
            ReleaseError::Other(_) => "other",
        }
    }
}

/// Operations the controller needs from the release manager
#[async_trait]
pub trait ReleaseClient: Send + Sync + std::fmt::Debug {
    /// Download a chart archive and return its local path
    async fn pull_archive(&self, url: &str) -> Result<PathBuf, ReleaseError>;

    /// Read the metadata of a downloaded chart archive
    async fn load_archive(&self, path: &Path) -> Result<ChartMetadata, ReleaseError>;

    async fn install(&self, request: InstallRequest) -> Result<(), ReleaseError>;

    async fn update(&self, request: UpdateRequest) -> Result<(), ReleaseError>;

    /// Uninstall a release, `ReleaseNotFound` when it is already gone
    async fn delete(
        &self,
        namespace: &str,
        release: &str,
        timeout: Duration,
    ) -> Result<(), ReleaseError>;

    async fn rollback(
        &self,
        namespace: &str,
        release: &str,
        revision: i64,
        timeout: Duration,
    ) -> Result<(), ReleaseError>;

    async fn get_content(
        &self,
        namespace: &str,
        release: &str,
    ) -> Result<ReleaseContent, ReleaseError>;

    /// Release history ordered by ascending revision
    async fn get_history(
        &self,
        namespace: &str,
        release: &str,
    ) -> Result<Vec<ReleaseHistoryEntry>, ReleaseError>;
}
