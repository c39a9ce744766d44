//! # Reconciler Types
//!
//! Shared state for the reconciler and its error taxonomy.

use crate::config::ControllerConfig;
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::pipeline::Pipeline;
use crate::helm::{CredentialPair, ReleaseError};
use crate::store::{RecordStore, StoreError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Per-Chart error backoff
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    pub fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(1, 10),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count = self.error_count.saturating_add(1);
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

impl Default for BackoffState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Release(#[from] ReleaseError),
    /// A referenced ConfigMap or Secret does not exist
    #[error("{0} not found")]
    NotFound(String),
    /// Override values could not be parsed
    #[error("invalid values in {0}")]
    Values(String),
    /// A payload had the wrong shape
    #[error("contract violation: {0}")]
    Contract(String),
    /// The Chart spec is not usable as written
    #[error("invalid Chart: {0}")]
    Validation(String),
    /// The release operation ran but its checksum could not be stored
    #[error("checksum not recorded for {0}")]
    ChecksumNotRecorded(String),
    #[error("unknown release failure: {0}")]
    Unknown(String),
}

impl ReconcilerError {
    /// Whether a handler should be re-run within the same pass
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcilerError::Kube(_) => true,
            ReconcilerError::Store(e) => e.is_transient(),
            ReconcilerError::Release(e) => {
                !(e.is_manifest_failure() || e.is_pull_failure() || e.is_not_found())
            }
            ReconcilerError::NotFound(_)
            | ReconcilerError::Values(_)
            | ReconcilerError::Contract(_)
            | ReconcilerError::Validation(_)
            | ReconcilerError::ChecksumNotRecorded(_)
            | ReconcilerError::Unknown(_) => false,
        }
    }

    /// Label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcilerError::Kube(_) => "kube",
            ReconcilerError::Store(e) if e.is_conflict() => "conflict",
            ReconcilerError::Store(_) => "store",
            ReconcilerError::Release(e) => e.kind(),
            ReconcilerError::NotFound(_) => "not_found",
            ReconcilerError::Values(_) => "values",
            ReconcilerError::Contract(_) => "contract",
            ReconcilerError::Validation(_) => "validation",
            ReconcilerError::ChecksumNotRecorded(_) => "checksum",
            ReconcilerError::Unknown(_) => "unknown",
        }
    }
}

/// Reconciler context shared by every pass
#[derive(Debug)]
pub struct Reconciler {
    pub store: Arc<dyn RecordStore>,
    pub credentials: CredentialPair,
    pub pipeline: Pipeline,
    pub config: ControllerConfig,
    /// Backoff state keyed by `namespace/name`
    /// Tracked per Chart so one failing release does not delay the others
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_and_values_never_retried() {
        assert!(!ReconcilerError::Contract("patch".into()).is_retryable());
        assert!(!ReconcilerError::Values("configmap".into()).is_retryable());
    }

    #[test]
    fn test_unrecorded_checksum_not_retried() {
        let err = ReconcilerError::ChecksumNotRecorded("charts/nginx".into());
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), "checksum");
    }

    #[test]
    fn test_conflicts_are_retried() {
        let err = ReconcilerError::Store(StoreError::Conflict("web/nginx".into()));
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "conflict");
    }

    #[test]
    fn test_classified_release_failures_not_retried() {
        assert!(!ReconcilerError::Release(ReleaseError::InvalidManifest("x".into())).is_retryable());
        assert!(!ReconcilerError::Release(ReleaseError::PullTimeout("x".into())).is_retryable());
        assert!(ReconcilerError::Release(ReleaseError::Timeout("x".into())).is_retryable());
    }

    #[test]
    fn test_backoff_state_reset() {
        let mut state = BackoffState::new();
        state.increment_error();
        state.increment_error();
        state.backoff.next_backoff_seconds();
        state.reset();
        assert_eq!(state.error_count, 0);
        assert_eq!(state.backoff.next_backoff_seconds(), 60);
    }
}
