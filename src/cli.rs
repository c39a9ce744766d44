//! # chartctl
//!
//! Command-line interface for the Chart Release Controller.
//!
//! Inspects Charts and toggles the annotations the controller reads.
//!
//! ## Usage
//!
//! ```bash
//! # List Charts in every namespace
//! chartctl list
//!
//! # Show status of a Chart
//! chartctl status --namespace charts --name nginx
//!
//! # Pause reconciliation of a Chart
//! chartctl cordon --name nginx --reason "db migration" --until 2024-06-01T00:00:00Z
//!
//! # Resume it
//! chartctl uncordon --name nginx
//!
//! # Upgrade even when nothing drifted (rolls back a stuck release)
//! chartctl force-upgrade --name nginx --enabled true
//! ```

use anyhow::{Context, Result};
use chart_release_controller::constants::{
    ANNOTATION_CORDON_REASON, ANNOTATION_CORDON_UNTIL, ANNOTATION_FORCE_UPGRADE, FIELD_MANAGER,
};
use chart_release_controller::crd::Chart;
use clap::{Parser, Subcommand};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Chart Release Controller CLI
#[derive(Debug, Parser)]
#[command(name = "chartctl")]
#[command(about = "Chart Release Controller CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Namespace of the Chart resource
    #[arg(short, long, global = true)]
    namespace: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List Charts (all namespaces unless --namespace is given)
    List,
    /// Show status of a Chart
    Status {
        #[arg(long)]
        name: String,
    },
    /// Pause reconciliation of a Chart
    Cordon {
        #[arg(long)]
        name: String,
        /// Why the Chart is paused, reported on its status
        #[arg(long)]
        reason: String,
        /// Free-form expiry recorded alongside the reason
        #[arg(long)]
        until: String,
    },
    /// Resume reconciliation of a cordoned Chart
    Uncordon {
        #[arg(long)]
        name: String,
    },
    /// Set or clear the force-upgrade annotation
    ForceUpgrade {
        #[arg(long)]
        name: String,
        #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
        enabled: bool,
    },
}

/// Merge patch setting or removing (`None`) annotations
fn annotation_patch(annotations: &BTreeMap<&str, Option<String>>) -> Value {
    let annotations: serde_json::Map<String, Value> = annotations
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone().map_or(Value::Null, Value::String)))
        .collect();
    json!({ "metadata": { "annotations": annotations } })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chartctl=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client. Ensure kubeconfig is configured.")?;
    let namespace = cli.namespace;

    match cli.command {
        Commands::List => list_command(client, namespace).await,
        Commands::Status { name } => status_command(client, &name, namespace).await,
        Commands::Cordon {
            name,
            reason,
            until,
        } => {
            let annotations = BTreeMap::from([
                (ANNOTATION_CORDON_REASON, Some(reason)),
                (ANNOTATION_CORDON_UNTIL, Some(until)),
            ]);
            patch_annotations(client, &name, namespace, &annotations).await?;
            println!("Chart '{name}' cordoned");
            Ok(())
        }
        Commands::Uncordon { name } => {
            let annotations = BTreeMap::from([
                (ANNOTATION_CORDON_REASON, None),
                (ANNOTATION_CORDON_UNTIL, None),
            ]);
            patch_annotations(client, &name, namespace, &annotations).await?;
            println!("Chart '{name}' uncordoned");
            Ok(())
        }
        Commands::ForceUpgrade { name, enabled } => {
            let value = enabled.then(|| "true".to_string());
            let annotations = BTreeMap::from([(ANNOTATION_FORCE_UPGRADE, value)]);
            patch_annotations(client, &name, namespace, &annotations).await?;
            println!("Force upgrade for '{name}': {enabled}");
            Ok(())
        }
    }
}

async fn patch_annotations(
    client: Client,
    name: &str,
    namespace: Option<String>,
    annotations: &BTreeMap<&str, Option<String>>,
) -> Result<()> {
    let ns = namespace.as_deref().unwrap_or("default");
    let api: Api<Chart> = Api::namespaced(client, ns);
    api.patch(
        name,
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(annotation_patch(annotations)),
    )
    .await
    .with_context(|| format!("Failed to patch Chart '{ns}/{name}'"))?;
    Ok(())
}

async fn list_command(client: Client, namespace: Option<String>) -> Result<()> {
    let api: Api<Chart> = match &namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };
    let charts = api
        .list(&ListParams::default())
        .await
        .context("Failed to list Charts")?;

    if charts.items.is_empty() {
        println!("No Charts found.");
        return Ok(());
    }

    println!(
        "{:<20} {:<25} {:<20} {:<10} {:<18} {}",
        "NAMESPACE", "NAME", "RELEASE", "VERSION", "STATUS", "REASON"
    );
    for chart in &charts.items {
        let status = chart.status.as_ref();
        println!(
            "{:<20} {:<25} {:<20} {:<10} {:<18} {}",
            chart.namespace().unwrap_or_default(),
            chart.name_any(),
            format!("{}/{}", chart.release_namespace(), chart.release_name()),
            chart.spec.version,
            status
                .and_then(|s| s.release.status.as_deref())
                .unwrap_or("-"),
            status.and_then(|s| s.reason.as_deref()).unwrap_or(""),
        );
    }
    Ok(())
}

async fn status_command(client: Client, name: &str, namespace: Option<String>) -> Result<()> {
    let ns = namespace.as_deref().unwrap_or("default");
    let api: Api<Chart> = Api::namespaced(client, ns);
    let chart = api
        .get(name)
        .await
        .with_context(|| format!("Failed to get Chart '{ns}/{name}'"))?;

    println!("Chart: {}", chart.key());
    println!("  Release: {}/{}", chart.release_namespace(), chart.release_name());
    println!("  Version: {}", chart.spec.version);
    println!("  Tarball: {}", chart.spec.tarball_url);
    if let Some(cordon) = chart.cordon() {
        println!("  Cordoned: {} (until {})", cordon.reason, cordon.until);
    }
    if chart.force_upgrade() {
        println!("  Force upgrade: enabled");
    }
    if chart.rollback_count() > 0 {
        println!("  Rollbacks: {}", chart.rollback_count());
    }

    match &chart.status {
        Some(status) => {
            println!("\nStatus:");
            let release = &status.release;
            println!("  Release status: {}", release.status.as_deref().unwrap_or("-"));
            if let Some(revision) = release.revision {
                println!("  Revision: {revision}");
            }
            if let Some(deployed) = &release.last_deployed {
                println!("  Last deployed: {deployed}");
            }
            if let Some(version) = &status.version {
                println!("  Chart version: {version}");
            }
            if let Some(app_version) = &status.app_version {
                println!("  App version: {app_version}");
            }
            if let Some(reason) = &status.reason {
                println!("  Reason: {reason}");
            }
        }
        None => println!("\nStatus: not reconciled yet"),
    }
    Ok(())
}
