//! # Chart Status
//!
//! Status written back to the Chart resource after every pass.

use chrono::{DateTime, SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Terminal markers written to `status.reason` / `status.release.status`
pub mod reasons {
    pub const ALREADY_EXISTS: &str = "already-exists";
    pub const CHART_PULL_FAILED: &str = "chart-pull-failed";
    pub const INVALID_MANIFEST: &str = "invalid-manifest";
    pub const NOT_INSTALLED: &str = "not-installed";
    pub const UNKNOWN_ERROR: &str = "unknown-error";
    pub const VALIDATION_FAILED: &str = "validation-failed";
    pub const VALUES_SCHEMA_VIOLATION: &str = "values-schema-violation";
    pub const CORDONED: &str = "cordoned";
}

/// Status of the Chart resource
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChartStatus {
    /// Application version reported by the deployed chart
    #[serde(default)]
    pub app_version: Option<String>,
    /// Human readable explanation when the release is not deployed
    #[serde(default)]
    pub reason: Option<String>,
    /// Release manager view of the release
    #[serde(default)]
    pub release: ReleaseInfo,
    /// Chart version of the deployed release
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseInfo {
    /// RFC3339 time of the last deployment, whole-second precision
    #[serde(default)]
    pub last_deployed: Option<String>,
    #[serde(default)]
    pub revision: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Format a deployment time the way it is stored in status
pub fn format_last_deployed(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Compare two stored timestamps at second granularity
fn same_instant(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            match (
                DateTime::parse_from_rfc3339(a),
                DateTime::parse_from_rfc3339(b),
            ) {
                (Ok(a), Ok(b)) => a.timestamp() == b.timestamp(),
                _ => a == b,
            }
        }
        _ => false,
    }
}

impl ChartStatus {
    /// Field-wise equality ignoring sub-second jitter in `lastDeployed`
    pub fn equivalent(&self, other: &ChartStatus) -> bool {
        self.app_version == other.app_version
            && self.reason == other.reason
            && self.version == other.version
            && self.release.revision == other.release.revision
            && self.release.status == other.release.status
            && same_instant(
                self.release.last_deployed.as_deref(),
                other.release.last_deployed.as_deref(),
            )
    }
}
