//! # Reconciliation Configuration
//!
//! Wait budgets, retry bounds, and release routing loaded from environment variables.

use super::env_var_or_default;
use std::time::Duration;

/// Controller configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Namespace treated as the privileged control-plane namespace
    pub control_plane_namespace: String,
    /// Release that must never be touched while it is failed
    /// Empty disables the guard
    pub protected_release: String,
    /// Service account impersonated by the restricted release client
    /// `None` means both handles use the controller's own credentials
    pub restricted_service_account: Option<String>,
    /// Path or name of the helm binary
    pub helm_binary: String,
    /// How long a pass waits for an install or upgrade (seconds)
    pub release_wait_secs: u64,
    /// How long a pass waits for namespace creation (seconds)
    pub namespace_wait_secs: u64,
    /// Maximum rollback attempts for a stuck release
    pub max_rollbacks: u32,
    /// Timeout handed to the release manager when a Chart sets none (seconds)
    pub default_release_timeout_secs: u64,
    /// Timeout for downloading chart archives (seconds)
    pub archive_pull_timeout_secs: u64,
    /// Periodic resync of every Chart (seconds)
    pub resync_period_secs: u64,
    /// Number of Charts reconciled concurrently
    pub reconcile_concurrency: u16,
    /// Attempts per pipeline handler before the error surfaces
    pub retry_max_attempts: u32,
    /// Initial delay between handler attempts (milliseconds)
    pub retry_initial_delay_ms: u64,
    /// Maximum delay between handler attempts (milliseconds)
    pub retry_max_delay_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            control_plane_namespace: DEFAULT_CONTROL_PLANE_NAMESPACE.to_string(),
            protected_release: DEFAULT_PROTECTED_RELEASE.to_string(),
            restricted_service_account: None,
            helm_binary: DEFAULT_HELM_BINARY.to_string(),
            release_wait_secs: DEFAULT_RELEASE_WAIT_SECS,
            namespace_wait_secs: DEFAULT_NAMESPACE_WAIT_SECS,
            max_rollbacks: DEFAULT_MAX_ROLLBACKS,
            default_release_timeout_secs: DEFAULT_RELEASE_TIMEOUT_SECS,
            archive_pull_timeout_secs: DEFAULT_ARCHIVE_PULL_TIMEOUT_SECS,
            resync_period_secs: DEFAULT_RESYNC_PERIOD_SECS,
            reconcile_concurrency: DEFAULT_RECONCILE_CONCURRENCY,
            retry_max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            retry_initial_delay_ms: DEFAULT_RETRY_INITIAL_DELAY_MS,
            retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            control_plane_namespace: env_var_or_default(
                "CONTROL_PLANE_NAMESPACE",
                DEFAULT_CONTROL_PLANE_NAMESPACE.to_string(),
            ),
            protected_release: env_var_or_default(
                "PROTECTED_RELEASE",
                DEFAULT_PROTECTED_RELEASE.to_string(),
            ),
            restricted_service_account: std::env::var("RESTRICTED_SERVICE_ACCOUNT")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            helm_binary: env_var_or_default("HELM_BINARY", DEFAULT_HELM_BINARY.to_string()),
            release_wait_secs: env_var_or_default("RELEASE_WAIT_SECS", DEFAULT_RELEASE_WAIT_SECS),
            namespace_wait_secs: env_var_or_default(
                "NAMESPACE_WAIT_SECS",
                DEFAULT_NAMESPACE_WAIT_SECS,
            ),
            max_rollbacks: env_var_or_default("MAX_ROLLBACKS", DEFAULT_MAX_ROLLBACKS),
            default_release_timeout_secs: env_var_or_default(
                "DEFAULT_RELEASE_TIMEOUT_SECS",
                DEFAULT_RELEASE_TIMEOUT_SECS,
            ),
            archive_pull_timeout_secs: env_var_or_default(
                "ARCHIVE_PULL_TIMEOUT_SECS",
                DEFAULT_ARCHIVE_PULL_TIMEOUT_SECS,
            ),
            resync_period_secs: env_var_or_default(
                "RESYNC_PERIOD_SECS",
                DEFAULT_RESYNC_PERIOD_SECS,
            ),
            reconcile_concurrency: env_var_or_default(
                "RECONCILE_CONCURRENCY",
                DEFAULT_RECONCILE_CONCURRENCY,
            ),
            retry_max_attempts: env_var_or_default(
                "RETRY_MAX_ATTEMPTS",
                DEFAULT_RETRY_MAX_ATTEMPTS,
            ),
            retry_initial_delay_ms: env_var_or_default(
                "RETRY_INITIAL_DELAY_MS",
                DEFAULT_RETRY_INITIAL_DELAY_MS,
            ),
            retry_max_delay_ms: env_var_or_default(
                "RETRY_MAX_DELAY_MS",
                DEFAULT_RETRY_MAX_DELAY_MS,
            ),
        }
    }

    pub fn release_wait(&self) -> Duration {
        Duration::from_secs(self.release_wait_secs)
    }

    pub fn namespace_wait(&self) -> Duration {
        Duration::from_secs(self.namespace_wait_secs)
    }

    pub fn default_release_timeout(&self) -> Duration {
        Duration::from_secs(self.default_release_timeout_secs)
    }

    pub fn resync_period(&self) -> Duration {
        Duration::from_secs(self.resync_period_secs)
    }

    /// Whether the given release is the controller's own protected release
    pub fn is_protected_release(&self, release: &str) -> bool {
        !self.protected_release.is_empty() && self.protected_release == release
    }
}
