//! # Helm CLI Client
//!
//! [`ReleaseClient`] backed by the `helm` binary.
//!
//! Every operation shells out to `helm` and reads JSON output where helm offers it.
//! Errors are classified from stderr by [`classify_helm_error`]. The restricted
//! handle is the same client with `--kube-as-user` set, so tenant releases are
//! applied with the impersonated account's permissions.

use super::classify::classify_helm_error;
use super::pull::ArchivePuller;
use super::{
    ChartMetadata, InstallRequest, ReleaseClient, ReleaseContent, ReleaseError,
    ReleaseHistoryEntry, ReleaseStatus, UpdateRequest,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, error, info};

/// Release client executing the `helm` binary
#[derive(Debug, Clone)]
pub struct HelmCli {
    binary: String,
    kube_as_user: Option<String>,
    puller: ArchivePuller,
    scratch_dir: PathBuf,
}

impl HelmCli {
    /// Create a client; archives are cached and values files written below `scratch_dir`
    pub fn new(
        binary: impl Into<String>,
        scratch_dir: PathBuf,
        pull_timeout: Duration,
    ) -> Result<Self, ReleaseError> {
        let puller = ArchivePuller::new(scratch_dir.join("archives"), pull_timeout)?;
        Ok(Self {
            binary: binary.into(),
            kube_as_user: None,
            puller,
            scratch_dir,
        })
    }

    /// Run every command as `user` (e.g. `system:serviceaccount:tenants:chart-release`)
    #[must_use]
    pub fn impersonating(mut self, user: impl Into<String>) -> Self {
        self.kube_as_user = Some(user.into());
        self
    }

    pub fn kube_as_user(&self) -> Option<&str> {
        self.kube_as_user.as_deref()
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);
        if let Some(user) = &self.kube_as_user {
            cmd.arg("--kube-as-user").arg(user);
        }
        cmd
    }

    /// Run helm and return stdout, classifying stderr on failure
    async fn run(&self, operation: &str, args: Vec<String>) -> Result<Vec<u8>, ReleaseError> {
        let start = Instant::now();
        debug!("Running helm {}", args.join(" "));

        let output = self.command(&args).output().await.map_err(|e| {
            error!("Failed to execute {}: {}", self.binary, e);
            ReleaseError::Execution(format!("{}: {e}", self.binary))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let classified = classify_helm_error(&stderr);
            info!(
                operation = operation,
                error.kind = classified.kind(),
                duration_ms = start.elapsed().as_millis(),
                "helm {} failed: {}",
                operation,
                stderr.trim()
            );
            return Err(classified);
        }

        debug!(
            operation = operation,
            duration_ms = start.elapsed().as_millis(),
            "helm {} completed",
            operation
        );
        Ok(output.stdout)
    }

    /// Write values to a file helm reads with `--values`
    fn write_values(
        &self,
        values: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<tempfile::NamedTempFile, ReleaseError> {
        std::fs::create_dir_all(&self.scratch_dir)
            .map_err(|e| ReleaseError::Execution(format!("failed to create scratch dir: {e}")))?;
        let mut file = tempfile::Builder::new()
            .prefix("values-")
            .suffix(".json")
            .tempfile_in(&self.scratch_dir)
            .map_err(|e| ReleaseError::Execution(format!("failed to create values file: {e}")))?;
        let body = serde_json::to_vec(values)
            .map_err(|e| ReleaseError::Execution(format!("failed to serialize values: {e}")))?;
        file.write_all(&body)
            .map_err(|e| ReleaseError::Execution(format!("failed to write values file: {e}")))?;
        Ok(file)
    }
}

fn timeout_arg(timeout: Duration) -> String {
    format!("{}s", timeout.as_secs().max(1))
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[async_trait]
impl ReleaseClient for HelmCli {
    async fn pull_archive(&self, url: &str) -> Result<PathBuf, ReleaseError> {
        self.puller.pull(url).await
    }

    async fn load_archive(&self, path: &Path) -> Result<ChartMetadata, ReleaseError> {
        let stdout = self
            .run("show", vec!["show".into(), "chart".into(), path_arg(path)])
            .await
            .map_err(|e| ReleaseError::ArchiveInvalid(format!("{}: {e}", path.display())))?;
        serde_yaml::from_slice(&stdout)
            .map_err(|e| ReleaseError::ArchiveInvalid(format!("{}: {e}", path.display())))
    }

    async fn install(&self, request: InstallRequest) -> Result<(), ReleaseError> {
        let values = self.write_values(&request.values)?;
        let mut args = vec![
            "install".to_string(),
            request.release.clone(),
            path_arg(&request.archive),
            "--namespace".into(),
            request.namespace.clone(),
            "--values".into(),
            path_arg(values.path()),
            "--timeout".into(),
            timeout_arg(request.timeout),
            "--wait".into(),
        ];
        if request.skip_crds {
            args.push("--skip-crds".into());
        }
        info!(
            "Installing release {}/{} from {}",
            request.namespace,
            request.release,
            request.archive.display()
        );
        self.run("install", args).await.map(|_| ())
    }

    async fn update(&self, request: UpdateRequest) -> Result<(), ReleaseError> {
        let values = self.write_values(&request.values)?;
        let mut args = vec![
            "upgrade".to_string(),
            request.release.clone(),
            path_arg(&request.archive),
            "--namespace".into(),
            request.namespace.clone(),
            "--values".into(),
            path_arg(values.path()),
            "--timeout".into(),
            timeout_arg(request.timeout),
            "--wait".into(),
        ];
        if request.force {
            args.push("--force".into());
        }
        info!(
            "Upgrading release {}/{} from {}",
            request.namespace,
            request.release,
            request.archive.display()
        );
        self.run("upgrade", args).await.map(|_| ())
    }

    async fn delete(
        &self,
        namespace: &str,
        release: &str,
        timeout: Duration,
    ) -> Result<(), ReleaseError> {
        info!("Uninstalling release {}/{}", namespace, release);
        self.run(
            "uninstall",
            vec![
                "uninstall".into(),
                release.to_string(),
                "--namespace".into(),
                namespace.to_string(),
                "--timeout".into(),
                timeout_arg(timeout),
                "--wait".into(),
            ],
        )
        .await
        .map(|_| ())
    }

    async fn rollback(
        &self,
        namespace: &str,
        release: &str,
        revision: i64,
        timeout: Duration,
    ) -> Result<(), ReleaseError> {
        info!(
            "Rolling back release {}/{} to revision {}",
            namespace, release, revision
        );
        self.run(
            "rollback",
            vec![
                "rollback".into(),
                release.to_string(),
                revision.to_string(),
                "--namespace".into(),
                namespace.to_string(),
                "--timeout".into(),
                timeout_arg(timeout),
                "--wait".into(),
            ],
        )
        .await
        .map(|_| ())
    }

    async fn get_content(
        &self,
        namespace: &str,
        release: &str,
    ) -> Result<ReleaseContent, ReleaseError> {
        let stdout = self
            .run(
                "status",
                vec![
                    "status".into(),
                    release.to_string(),
                    "--namespace".into(),
                    namespace.to_string(),
                    "--output".into(),
                    "json".into(),
                ],
            )
            .await?;
        parse_release_content(&stdout)
    }

    async fn get_history(
        &self,
        namespace: &str,
        release: &str,
    ) -> Result<Vec<ReleaseHistoryEntry>, ReleaseError> {
        let stdout = self
            .run(
                "history",
                vec![
                    "history".into(),
                    release.to_string(),
                    "--namespace".into(),
                    namespace.to_string(),
                    "--output".into(),
                    "json".into(),
                ],
            )
            .await?;
        parse_history(&stdout)
    }
}

#[derive(Debug, Deserialize)]
struct HelmRelease {
    name: String,
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    version: i64,
    #[serde(default)]
    info: HelmReleaseInfo,
    #[serde(default)]
    chart: Option<HelmChart>,
    #[serde(default)]
    config: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Default, Deserialize)]
struct HelmReleaseInfo {
    #[serde(default)]
    status: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct HelmChart {
    metadata: ChartMetadata,
}

#[derive(Debug, Deserialize)]
struct HelmHistoryEntry {
    revision: i64,
    #[serde(default)]
    updated: Option<String>,
    #[serde(default)]
    status: String,
    #[serde(default)]
    chart: String,
    #[serde(default)]
    app_version: Option<String>,
    #[serde(default)]
    description: String,
}

/// Parse `helm status -o json`
pub fn parse_release_content(raw: &[u8]) -> Result<ReleaseContent, ReleaseError> {
    let release: HelmRelease = serde_json::from_slice(raw)
        .map_err(|e| ReleaseError::Other(format!("unexpected helm status output: {e}")))?;
    let (version, app_version) = release
        .chart
        .map(|c| (c.metadata.version, c.metadata.app_version))
        .unwrap_or_default();
    Ok(ReleaseContent {
        name: release.name,
        namespace: release.namespace,
        status: ReleaseStatus::parse(&release.info.status),
        version,
        app_version,
        description: release.info.description,
        revision: release.version,
        values: release.config.unwrap_or_default(),
    })
}

/// Parse `helm history -o json`, ordered by ascending revision
pub fn parse_history(raw: &[u8]) -> Result<Vec<ReleaseHistoryEntry>, ReleaseError> {
    let entries: Vec<HelmHistoryEntry> = serde_json::from_slice(raw)
        .map_err(|e| ReleaseError::Other(format!("unexpected helm history output: {e}")))?;
    let mut history: Vec<ReleaseHistoryEntry> = entries
        .into_iter()
        .map(|e| ReleaseHistoryEntry {
            revision: e.revision,
            status: ReleaseStatus::parse(&e.status),
            app_version: e.app_version.filter(|v| !v.is_empty()),
            version: chart_version_from_label(&e.chart).to_string(),
            last_deployed: e
                .updated
                .as_deref()
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map(|t| t.with_timezone(&Utc)),
            description: e.description,
        })
        .collect();
    history.sort_by_key(|e| e.revision);
    Ok(history)
}

/// Extract the version from helm's `<chart>-<version>` history label
pub fn chart_version_from_label(label: &str) -> &str {
    label
        .char_indices()
        .find(|(i, c)| {
            *c == '-'
                && label[i + 1..]
                    .chars()
                    .next()
                    .is_some_and(|n| n.is_ascii_digit())
        })
        .map_or("", |(i, _)| &label[i + 1..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_release_content() {
        let raw = br#"{
            "name": "nginx",
            "namespace": "web",
            "version": 4,
            "info": {
                "first_deployed": "2024-05-01T10:00:00.123456+00:00",
                "last_deployed": "2024-05-02T10:00:00.123456+00:00",
                "status": "failed",
                "description": "Upgrade \"nginx\" failed: timed out"
            },
            "chart": {"metadata": {"name": "nginx", "version": "1.2.0", "appVersion": "1.25.0"}},
            "config": {"replicas": 3}
        }"#;
        let content = parse_release_content(raw).expect("valid status output");
        assert_eq!(content.status, ReleaseStatus::Failed);
        assert_eq!(content.revision, 4);
        assert_eq!(content.version, "1.2.0");
        assert_eq!(content.app_version.as_deref(), Some("1.25.0"));
        assert_eq!(content.values.get("replicas"), Some(&serde_json::json!(3)));
    }

    #[test]
    fn test_parse_release_content_null_config() {
        let raw = br#"{"name":"nginx","namespace":"web","version":1,"info":{"status":"deployed"},"config":null}"#;
        let content = parse_release_content(raw).expect("valid status output");
        assert!(content.values.is_empty());
        assert_eq!(content.version, "");
    }

    #[test]
    fn test_parse_history_sorts_ascending() {
        let raw = br#"[
            {"revision": 2, "updated": "2024-05-02T10:00:00.5+00:00", "status": "failed", "chart": "nginx-1.1.0", "app_version": "1.25.0", "description": "Upgrade failed"},
            {"revision": 1, "updated": "2024-05-01T10:00:00+00:00", "status": "superseded", "chart": "nginx-1.0.0", "app_version": "", "description": "Install complete"}
        ]"#;
        let history = parse_history(raw).expect("valid history output");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].revision, 1);
        assert_eq!(history[0].status, ReleaseStatus::Superseded);
        assert_eq!(history[0].app_version, None);
        assert_eq!(history[1].version, "1.1.0");
        assert!(history[1].last_deployed.is_some());
    }

    #[test]
    fn test_chart_version_from_label() {
        assert_eq!(chart_version_from_label("nginx-1.0.0"), "1.0.0");
        assert_eq!(
            chart_version_from_label("ingress-nginx-4.10.0-rc.1"),
            "4.10.0-rc.1"
        );
        assert_eq!(chart_version_from_label("nginx"), "");
    }

    #[test]
    fn test_impersonation_adds_flag() {
        let cli = HelmCli::new("helm", PathBuf::from("/tmp/helm"), Duration::from_secs(5))
            .expect("client builds")
            .impersonating("system:serviceaccount:tenants:chart-release");
        let cmd = cli.command(&["status".to_string()]);
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "status",
                "--kube-as-user",
                "system:serviceaccount:tenants:chart-release"
            ]
        );
    }

    #[test]
    fn test_timeout_arg_never_zero() {
        assert_eq!(timeout_arg(Duration::from_millis(10)), "1s");
        assert_eq!(timeout_arg(Duration::from_secs(300)), "300s");
    }
}
