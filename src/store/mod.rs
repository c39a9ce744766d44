//! # Record Store Adapter
//!
//! Kubernetes object access used by the reconciliation pipeline.
//!
//! Writes to the Chart record go through optimistic concurrency: status
//! replacement carries the `resourceVersion` it was read at, and a stale write
//! fails with [`StoreError::Conflict`] so the caller re-reads and retries.

pub mod kube;

pub use self::kube::KubeRecordStore;

use crate::crd::{Chart, ChartStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] ::kube::Error),
    #[error("conflicting write to {0}")]
    Conflict(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid object {0}: {1}")]
    Invalid(String, String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// Whether repeating the same request can succeed
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            StoreError::NotFound(_) | StoreError::AlreadyExists(_) | StoreError::Invalid(..)
        )
    }
}

/// Helm storage record backing one release revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseRecord {
    /// Name of the storage object (e.g. `sh.helm.release.v1.nginx.v3`)
    pub name: String,
    pub revision: i64,
    pub status: String,
    pub created: Option<DateTime<Utc>>,
}

/// Cluster object access needed by the pipeline
#[async_trait]
pub trait RecordStore: Send + Sync + std::fmt::Debug {
    async fn get_chart(&self, namespace: &str, name: &str) -> Result<Chart, StoreError>;

    /// Merge-patch annotations; `None` removes the key
    async fn patch_chart_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: BTreeMap<String, Option<String>>,
    ) -> Result<(), StoreError>;

    /// Replace the status subresource at the Chart's `resourceVersion`
    async fn replace_chart_status(
        &self,
        chart: &Chart,
        status: ChartStatus,
    ) -> Result<(), StoreError>;

    async fn add_finalizer(&self, chart: &Chart, finalizer: &str) -> Result<(), StoreError>;

    async fn remove_finalizer(&self, chart: &Chart, finalizer: &str) -> Result<(), StoreError>;

    /// Values document stored under `key`, `None` when the ConfigMap is absent
    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<String>, StoreError>;

    /// Values document stored under `key`, `None` when the Secret is absent
    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<String>, StoreError>;

    async fn namespace_exists(&self, name: &str) -> Result<bool, StoreError>;

    /// Create a namespace, `AlreadyExists` when it is already there
    async fn create_namespace(
        &self,
        name: &str,
        labels: BTreeMap<String, String>,
    ) -> Result<(), StoreError>;

    async fn list_release_records(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<ReleaseRecord>, StoreError>;

    async fn delete_release_record(&self, namespace: &str, name: &str) -> Result<(), StoreError>;
}
