//! # Custom Resource Definitions
//!
//! CRD types for the Chart Release Controller.
//!
//! A `Chart` declares which chart archive should be installed as a Helm release,
//! where it should land, and which ConfigMap/Secret supply override values.
//! The controller never mutates the spec; it only writes annotations and status.

pub mod status;

pub use status::{ChartStatus, ReleaseInfo};

use crate::constants::{
    ANNOTATION_CORDON_REASON, ANNOTATION_CORDON_UNTIL, ANNOTATION_FORCE_UPGRADE,
    ANNOTATION_ROLLBACK_COUNT, ANNOTATION_VALUES_CHECKSUM, CHART_FINALIZER,
};
use kube::CustomResource;
use kube::ResourceExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Chart Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: chart.microscaler.io/v1
/// kind: Chart
/// metadata:
///   name: ingress-nginx
///   namespace: microscaler-system
/// spec:
///   name: ingress-nginx
///   namespace: ingress
///   tarballUrl: https://charts.example.com/ingress-nginx-4.10.0.tgz
///   version: 4.10.0
///   config:
///     configMap:
///       name: ingress-nginx-values
///       namespace: microscaler-system
/// ```
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "Chart",
    group = "chart.microscaler.io",
    version = "v1",
    namespaced,
    status = "ChartStatus",
    shortname = "chart",
    printcolumn = r#"{"name":"Release", "type":"string", "jsonPath":".spec.name"}, {"name":"Version", "type":"string", "jsonPath":".spec.version"}, {"name":"Status", "type":"string", "jsonPath":".status.release.status"}, {"name":"Reason", "type":"string", "jsonPath":".status.reason"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ChartSpec {
    /// Release name
    pub name: String,
    /// Namespace the release is installed into
    pub namespace: String,
    /// Location of the packaged chart archive (.tgz)
    pub tarball_url: String,
    /// Chart version the archive is expected to carry
    pub version: String,
    /// Override values sources
    #[serde(default)]
    pub config: Option<ChartConfig>,
    /// Install options
    #[serde(default)]
    pub install: Option<InstallOptions>,
    /// Upgrade options
    #[serde(default)]
    pub upgrade: Option<UpgradeOptions>,
    /// Rollback options
    #[serde(default)]
    pub rollback: Option<RollbackOptions>,
    /// Uninstall options
    #[serde(default)]
    pub uninstall: Option<UninstallOptions>,
}

/// Sources of override values
/// When both are set, the Secret's values win on key collision
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChartConfig {
    #[serde(default)]
    pub config_map: Option<ObjectRef>,
    #[serde(default)]
    pub secret: Option<ObjectRef>,
}

/// Reference to a namespaced object
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstallOptions {
    /// Skip installing CRDs shipped in the chart's crds/ directory
    #[serde(default)]
    pub skip_crds: bool,
    /// Kubernetes duration string (e.g. "5m")
    #[serde(default)]
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeOptions {
    #[serde(default)]
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RollbackOptions {
    #[serde(default)]
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UninstallOptions {
    #[serde(default)]
    pub timeout: Option<String>,
}

/// Pause marker read from the cordon annotations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cordon {
    pub reason: String,
    pub until: String,
}

impl Chart {
    pub fn release_name(&self) -> &str {
        &self.spec.name
    }

    pub fn release_namespace(&self) -> &str {
        &self.spec.namespace
    }

    fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    /// Cordon marker, present only when both reason and expiry are set
    pub fn cordon(&self) -> Option<Cordon> {
        let reason = self.annotation(ANNOTATION_CORDON_REASON)?;
        let until = self.annotation(ANNOTATION_CORDON_UNTIL)?;
        Some(Cordon {
            reason: reason.to_string(),
            until: until.to_string(),
        })
    }

    pub fn force_upgrade(&self) -> bool {
        self.annotation(ANNOTATION_FORCE_UPGRADE)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    /// Checksum of the values last applied, empty when never applied
    pub fn values_checksum(&self) -> &str {
        self.annotation(ANNOTATION_VALUES_CHECKSUM).unwrap_or("")
    }

    pub fn rollback_count(&self) -> u32 {
        self.annotation(ANNOTATION_ROLLBACK_COUNT)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == CHART_FINALIZER)
    }

    /// `namespace/name` key of the Chart resource itself
    pub fn key(&self) -> String {
        format!(
            "{}/{}",
            self.namespace().unwrap_or_else(|| "default".to_string()),
            self.name_any()
        )
    }
}
