//! # Kubernetes Record Store
//!
//! [`RecordStore`] implemented with `kube::Api`.

use super::{RecordStore, ReleaseRecord, StoreError};
use crate::constants::FIELD_MANAGER;
use crate::crd::{Chart, ChartStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Clone)]
pub struct KubeRecordStore {
    client: Client,
}

impl std::fmt::Debug for KubeRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeRecordStore").finish_non_exhaustive()
    }
}

impl KubeRecordStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn charts(&self, namespace: &str) -> Api<Chart> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn patch_finalizers(&self, chart: &Chart, finalizers: Vec<String>) -> Result<(), StoreError> {
        let namespace = chart.namespace().unwrap_or_default();
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        self.charts(&namespace)
            .patch(
                &chart.name_any(),
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await
            .map_err(|e| map_kube_error(e, &chart.key()))?;
        Ok(())
    }
}

/// Map API status codes onto the store taxonomy
fn map_kube_error(error: kube::Error, object: &str) -> StoreError {
    match &error {
        kube::Error::Api(api_err) if api_err.code == 404 => StoreError::NotFound(object.to_string()),
        kube::Error::Api(api_err) if api_err.code == 409 && api_err.reason == "AlreadyExists" => {
            StoreError::AlreadyExists(object.to_string())
        }
        kube::Error::Api(api_err) if api_err.code == 409 => StoreError::Conflict(object.to_string()),
        _ => StoreError::Kube(error),
    }
}

/// Helm release secrets carry the revision in their `version` label
fn release_record_from_secret(secret: &Secret) -> Option<ReleaseRecord> {
    let labels = secret.metadata.labels.as_ref()?;
    let revision = labels.get("version")?.parse().ok()?;
    Some(ReleaseRecord {
        name: secret.name_any(),
        revision,
        status: labels.get("status").cloned().unwrap_or_default(),
        created: secret.metadata.creation_timestamp.as_ref().and_then(to_utc),
    })
}

/// Read a meta/v1 `Time` through its RFC3339 wire form
fn to_utc(time: &Time) -> Option<DateTime<Utc>> {
    let value = serde_json::to_value(time).ok()?;
    DateTime::parse_from_rfc3339(value.as_str()?)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[async_trait]
impl RecordStore for KubeRecordStore {
    async fn get_chart(&self, namespace: &str, name: &str) -> Result<Chart, StoreError> {
        self.charts(namespace)
            .get(name)
            .await
            .map_err(|e| map_kube_error(e, &format!("{namespace}/{name}")))
    }

    async fn patch_chart_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: BTreeMap<String, Option<String>>,
    ) -> Result<(), StoreError> {
        if annotations.is_empty() {
            return Ok(());
        }
        debug!("Patching annotations on Chart {}/{}: {:?}", namespace, name, annotations.keys());
        let patch = serde_json::json!({
            "metadata": {
                "annotations": annotations
            }
        });
        self.charts(namespace)
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_kube_error(e, &format!("{namespace}/{name}")))?;
        Ok(())
    }

    async fn replace_chart_status(&self, chart: &Chart, status: ChartStatus) -> Result<(), StoreError> {
        let namespace = chart.namespace().unwrap_or_default();
        // resourceVersion makes the merge patch conditional
        let patch = serde_json::json!({
            "metadata": {
                "resourceVersion": chart.resource_version()
            },
            "status": status
        });
        self.charts(&namespace)
            .patch_status(
                &chart.name_any(),
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await
            .map_err(|e| map_kube_error(e, &chart.key()))?;
        Ok(())
    }

    async fn add_finalizer(&self, chart: &Chart, finalizer: &str) -> Result<(), StoreError> {
        let mut finalizers = chart.finalizers().to_vec();
        if finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }
        finalizers.push(finalizer.to_string());
        self.patch_finalizers(chart, finalizers).await
    }

    async fn remove_finalizer(&self, chart: &Chart, finalizer: &str) -> Result<(), StoreError> {
        let finalizers: Vec<String> = chart
            .finalizers()
            .iter()
            .filter(|f| *f != finalizer)
            .cloned()
            .collect();
        match self.patch_finalizers(chart, finalizers).await {
            Err(StoreError::NotFound(_)) => Ok(()),
            other => other,
        }
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<String>, StoreError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let config_map = match api.get_opt(name).await {
            Ok(Some(cm)) => cm,
            Ok(None) => return Ok(None),
            Err(e) => return Err(map_kube_error(e, &format!("configmap {namespace}/{name}"))),
        };
        Ok(Some(
            config_map
                .data
                .and_then(|mut d| d.remove(key))
                .unwrap_or_default(),
        ))
    }

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<String>, StoreError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = match api.get_opt(name).await {
            Ok(Some(s)) => s,
            Ok(None) => return Ok(None),
            Err(e) => return Err(map_kube_error(e, &format!("secret {namespace}/{name}"))),
        };
        if let Some(bytes) = secret.data.as_ref().and_then(|d| d.get(key)) {
            let value = String::from_utf8(bytes.0.clone()).map_err(|e| {
                StoreError::Invalid(format!("secret {namespace}/{name}"), e.to_string())
            })?;
            return Ok(Some(value));
        }
        Ok(Some(
            secret
                .string_data
                .and_then(|mut d| d.remove(key))
                .unwrap_or_default(),
        ))
    }

    async fn namespace_exists(&self, name: &str) -> Result<bool, StoreError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.get_opt(name)
            .await
            .map(|ns| ns.is_some())
            .map_err(|e| map_kube_error(e, &format!("namespace {name}")))
    }

    async fn create_namespace(
        &self,
        name: &str,
        labels: BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        };
        api.create(&PostParams::default(), &namespace)
            .await
            .map_err(|e| map_kube_error(e, &format!("namespace {name}")))?;
        Ok(())
    }

    async fn list_release_records(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<ReleaseRecord>, StoreError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default().labels(label_selector))
            .await
            .map_err(|e| map_kube_error(e, &format!("release records in {namespace}")))?;
        let mut records: Vec<ReleaseRecord> =
            list.items.iter().filter_map(release_record_from_secret).collect();
        records.sort_by_key(|r| r.revision);
        Ok(records)
    }

    async fn delete_release_record(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) => Err(map_kube_error(e, &format!("secret {namespace}/{name}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn helm_secret(name: &str, labels: &[(&str, &str)]) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                creation_timestamp: serde_json::from_value(serde_json::json!("2024-05-01T10:00:00Z"))
                    .ok(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_release_record_from_helm_secret() {
        let secret = helm_secret(
            "sh.helm.release.v1.nginx.v3",
            &[("owner", "helm"), ("name", "nginx"), ("version", "3"), ("status", "failed")],
        );
        let record = release_record_from_secret(&secret).expect("helm secret parses");
        assert_eq!(record.revision, 3);
        assert_eq!(record.status, "failed");
        assert_eq!(
            record.created.map(|t| t.timestamp()),
            Some(1_714_557_600)
        );
    }

    #[test]
    fn test_release_record_requires_version_label() {
        let secret = helm_secret("unrelated", &[("owner", "helm")]);
        assert!(release_record_from_secret(&secret).is_none());
    }
}
