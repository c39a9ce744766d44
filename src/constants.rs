//! # Constants
//!
//! Annotation keys, labels, and default values shared across the controller.

/// Field manager used for every patch the controller issues
pub const FIELD_MANAGER: &str = "chart-release-controller";

/// Finalizer placed on Chart resources so release removal is confirmed before deletion
pub const CHART_FINALIZER: &str = "chart.microscaler.io/release-cleanup";

/// Annotation carrying the checksum of the values last sent to the release manager
pub const ANNOTATION_VALUES_CHECKSUM: &str = "chart.microscaler.io/values-checksum";

/// Annotation counting rollback attempts for a stuck release
pub const ANNOTATION_ROLLBACK_COUNT: &str = "chart.microscaler.io/rollback-count";

/// Annotation holding the human readable reason a Chart is cordoned
pub const ANNOTATION_CORDON_REASON: &str = "chart.microscaler.io/cordon-reason";

/// Annotation holding the RFC3339 time a cordon is meant to expire
pub const ANNOTATION_CORDON_UNTIL: &str = "chart.microscaler.io/cordon-until";

/// Annotation opting a Chart into forced upgrades and rollback-on-stuck
pub const ANNOTATION_FORCE_UPGRADE: &str = "chart.microscaler.io/force-upgrade";

/// Label placed on namespaces created by the controller
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Key inside ConfigMaps and Secrets that holds the serialized values document
pub const VALUES_KEY: &str = "values";

/// Number of consecutive failed revisions that blocks further upgrades
pub const MAX_FAILED_REVISIONS: usize = 3;

/// Minimum age of a failed revision before its storage record may be pruned
pub const FAILED_REVISION_MIN_AGE_SECS: i64 = 60;

/// Default namespace treated as the privileged control-plane namespace
pub const DEFAULT_CONTROL_PLANE_NAMESPACE: &str = "microscaler-system";

/// Default release name of the controller's own bootstrap release
pub const DEFAULT_PROTECTED_RELEASE: &str = "chart-release-controller";

/// Default helm binary
pub const DEFAULT_HELM_BINARY: &str = "helm";

/// Default time a pass waits for an install or upgrade before moving on
pub const DEFAULT_RELEASE_WAIT_SECS: u64 = 10;

/// Default time a pass waits for namespace creation before cancelling
pub const DEFAULT_NAMESPACE_WAIT_SECS: u64 = 5;

/// Default maximum number of rollback attempts for a stuck release
pub const DEFAULT_MAX_ROLLBACKS: u32 = 3;

/// Default timeout handed to the release manager for a single operation
pub const DEFAULT_RELEASE_TIMEOUT_SECS: u64 = 300;

/// Default timeout for downloading a chart archive
pub const DEFAULT_ARCHIVE_PULL_TIMEOUT_SECS: u64 = 30;

/// Cached chart archives unused for this long are evicted
pub const DEFAULT_ARCHIVE_CACHE_MAX_AGE_SECS: u64 = 86_400;

/// Default periodic resync of every Chart
pub const DEFAULT_RESYNC_PERIOD_SECS: u64 = 300;

/// Default number of Charts reconciled concurrently
pub const DEFAULT_RECONCILE_CONCURRENCY: u16 = 10;

/// Default number of attempts for a single pipeline handler
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;

/// Default initial delay between handler attempts
pub const DEFAULT_RETRY_INITIAL_DELAY_MS: u64 = 200;

/// Default maximum delay between handler attempts
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 5_000;

/// Default requeue delay when the per-resource backoff state is unavailable
pub const DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS: u64 = 60;

/// Requeue delay while a deleted Chart's release is still being removed
pub const DEFAULT_FINALIZER_REQUEUE_SECS: u64 = 30;

/// Initial backoff after the API server throttles the watch (milliseconds)
pub const DEFAULT_WATCH_INITIAL_BACKOFF_MS: u64 = 1_000;

/// Upper bound for the watch throttling backoff (milliseconds)
pub const DEFAULT_WATCH_MAX_BACKOFF_MS: u64 = 30_000;

/// Default delay before restarting a failed watch
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default port for metrics and probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default server startup timeout
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;
