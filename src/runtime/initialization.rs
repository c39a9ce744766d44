//! # Initialization
//!
//! Controller startup: rustls setup, tracing, metrics, server startup,
//! release manager clients and the Kubernetes client.

use crate::config::{load_config, ControllerConfig, ServerConfig};
use crate::controller::reconciler::{reconcile_with_source, Reconciler, TriggerSource};
use crate::controller::server::{start_server, ServerState};
use crate::crd::Chart;
use crate::helm::{CredentialPair, HelmCli, ReleaseClient};
use crate::observability;
use crate::store::{KubeRecordStore, RecordStore};
use anyhow::{Context, Result};
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Everything the watch loop needs
pub struct InitializationResult {
    pub client: Client,
    /// Charts across all namespaces
    pub charts: Api<Chart>,
    pub reconciler: Arc<Reconciler>,
    pub server_state: Arc<ServerState>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("reconciler", &self.reconciler)
            .field("server_state", &self.server_state)
            .finish_non_exhaustive()
    }
}

/// Initialize the controller runtime
///
/// - rustls crypto provider setup
/// - tracing subscriber setup
/// - metrics registration
/// - HTTP server startup
/// - helm binary lookup and release clients
/// - Kubernetes client creation
/// - reconcile Charts that existed before startup
pub async fn initialize() -> Result<InitializationResult> {
    // Must happen before any TLS connection is made
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_existing| anyhow::anyhow!("A rustls crypto provider is already installed"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chart_release_controller=info".into()),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Chart Release Controller"
    );

    let (controller_config, server_config) = load_config();
    info!(
        control_plane_namespace = %controller_config.control_plane_namespace,
        release_wait_secs = controller_config.release_wait_secs,
        resync_period_secs = controller_config.resync_period_secs,
        "Loaded configuration"
    );

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState {
        is_ready: Arc::new(AtomicBool::new(false)),
    });
    let server_handle = {
        let state = Arc::clone(&server_state);
        let port = server_config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = start_server(port, state).await {
                error!("HTTP server error: {:#}", e);
            }
        })
    };
    wait_for_server_ready(&server_state, &server_handle, &server_config).await?;

    let credentials = build_credentials(&controller_config)?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let charts: Api<Chart> = Api::all(client.clone());
    let store: Arc<dyn RecordStore> = Arc::new(KubeRecordStore::new(client.clone()));

    let reconciler = Arc::new(Reconciler::new(store, credentials, controller_config));

    reconcile_existing_resources(&charts, &reconciler).await;

    info!("Controller initialized, starting watch loop...");
    Ok(InitializationResult {
        client,
        charts,
        reconciler,
        server_state,
    })
}

/// Kubernetes username the restricted client impersonates
///
/// A bare name is a ServiceAccount in the control-plane namespace.
pub fn impersonation_user(service_account: &str, control_plane_namespace: &str) -> String {
    if service_account.starts_with("system:") {
        service_account.to_string()
    } else {
        format!("system:serviceaccount:{control_plane_namespace}:{service_account}")
    }
}

fn build_credentials(config: &ControllerConfig) -> Result<CredentialPair> {
    let helm = which::which(&config.helm_binary).with_context(|| {
        format!(
            "helm binary '{}' not found; set HELM_BINARY or add it to PATH",
            config.helm_binary
        )
    })?;
    info!(helm = %helm.display(), "Using helm binary");

    let scratch_dir = std::env::var("CHART_SCRATCH_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("chart-release-controller"));
    std::fs::create_dir_all(&scratch_dir)
        .with_context(|| format!("Failed to create scratch directory {}", scratch_dir.display()))?;

    let privileged = HelmCli::new(
        helm.to_string_lossy(),
        scratch_dir,
        Duration::from_secs(config.archive_pull_timeout_secs),
    )?;

    let restricted = match &config.restricted_service_account {
        Some(sa) => {
            let user = impersonation_user(sa, &config.control_plane_namespace);
            info!(user = %user, "Restricted release client impersonates service account");
            privileged.clone().impersonating(user)
        }
        None => {
            warn!("RESTRICTED_SERVICE_ACCOUNT not set, tenant releases use controller credentials");
            privileged.clone()
        }
    };

    let privileged: Arc<dyn ReleaseClient> = Arc::new(privileged);
    let restricted: Arc<dyn ReleaseClient> = Arc::new(restricted);
    Ok(CredentialPair::new(
        privileged,
        restricted,
        config.control_plane_namespace.clone(),
    ))
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
    config: &ServerConfig,
) -> Result<()> {
    let startup_timeout = Duration::from_secs(config.startup_timeout_secs);
    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }
        if server_state.is_ready.load(Ordering::Relaxed) {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }
        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// Group Chart names by namespace, both sorted
pub fn summarize_by_namespace(charts: &[Chart]) -> BTreeMap<String, Vec<String>> {
    let mut by_namespace: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for chart in charts {
        by_namespace
            .entry(chart.namespace().unwrap_or_default())
            .or_default()
            .push(chart.name_any());
    }
    for names in by_namespace.values_mut() {
        names.sort();
    }
    by_namespace
}

/// Reconcile Charts that existed before the controller started
///
/// Failures are logged and left to the watch loop, which sees every Chart again.
async fn reconcile_existing_resources(charts: &Api<Chart>, reconciler: &Arc<Reconciler>) {
    let list = match charts.list(&ListParams::default()).await {
        Ok(list) => list,
        Err(e) => {
            error!("Chart CRD is not queryable: {}. Is the CRD installed?", e);
            error!("Installation: crdgen | kubectl apply -f -");
            warn!("Continuing, the watch loop will retry");
            return;
        }
    };

    if list.items.is_empty() {
        info!("No existing Charts found, watch will pick up new resources");
        return;
    }

    info!("Found {} existing Charts", list.items.len());
    for (namespace, names) in summarize_by_namespace(&list.items) {
        info!(namespace = %namespace, count = names.len(), "Charts: {}", names.join(", "));
    }

    for chart in list.items {
        let key = chart.key();
        match reconcile_with_source(Arc::new(chart), Arc::clone(reconciler), TriggerSource::Startup)
            .await
        {
            Ok(_) => info!(chart = %key, "Reconciled existing Chart"),
            Err(e) => error!(chart = %key, error = %e, "Failed to reconcile existing Chart"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::resources::test_support::chart;

    #[test]
    fn test_impersonation_user() {
        assert_eq!(
            impersonation_user("chart-tenant", "microscaler-system"),
            "system:serviceaccount:microscaler-system:chart-tenant"
        );
        assert_eq!(
            impersonation_user("system:serviceaccount:tenants:deployer", "microscaler-system"),
            "system:serviceaccount:tenants:deployer"
        );
    }

    #[test]
    fn test_summarize_by_namespace() {
        let mut other = chart("redis", "cache");
        other.metadata.namespace = Some("apps".to_string());
        let summary = summarize_by_namespace(&[chart("nginx", "web"), other, chart("api", "web")]);
        assert_eq!(summary.len(), 2);
        assert_eq!(
            summary.get("charts"),
            Some(&vec!["api".to_string(), "nginx".to_string()])
        );
        assert_eq!(summary.get("apps"), Some(&vec!["redis".to_string()]));
    }
}
