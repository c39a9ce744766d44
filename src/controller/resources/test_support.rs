//! In-memory fakes for the release manager and record store.

use crate::config::ControllerConfig;
use crate::crd::{Chart, ChartConfig, ChartSpec, ChartStatus, ObjectRef};
use crate::helm::{
    ChartMetadata, InstallRequest, ReleaseClient, ReleaseContent, ReleaseError,
    ReleaseHistoryEntry, ReleaseStatus, UpdateRequest,
};
use crate::store::{RecordStore, ReleaseRecord, StoreError};
use async_trait::async_trait;
use kube::api::ObjectMeta;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

pub const CHART_NAMESPACE: &str = "charts";

/// Chart named after its release, stored in [`CHART_NAMESPACE`]
pub fn chart(release: &str, release_namespace: &str) -> Chart {
    let mut chart = Chart::new(
        release,
        ChartSpec {
            name: release.to_string(),
            namespace: release_namespace.to_string(),
            tarball_url: format!("https://charts.example.com/{release}-1.0.0.tgz"),
            version: "1.0.0".to_string(),
            config: None,
            install: None,
            upgrade: None,
            rollback: None,
            uninstall: None,
        },
    );
    chart.metadata = ObjectMeta {
        name: Some(release.to_string()),
        namespace: Some(CHART_NAMESPACE.to_string()),
        resource_version: Some("1".to_string()),
        ..Default::default()
    };
    chart
}

pub fn with_annotations(mut chart: Chart, annotations: &[(&str, &str)]) -> Chart {
    let map = chart.metadata.annotations.get_or_insert_with(BTreeMap::new);
    for (k, v) in annotations {
        map.insert((*k).to_string(), (*v).to_string());
    }
    chart
}

pub fn with_values_refs(mut chart: Chart, config_map: Option<&str>, secret: Option<&str>) -> Chart {
    chart.spec.config = Some(ChartConfig {
        config_map: config_map.map(|name| ObjectRef {
            name: name.to_string(),
            namespace: CHART_NAMESPACE.to_string(),
        }),
        secret: secret.map(|name| ObjectRef {
            name: name.to_string(),
            namespace: CHART_NAMESPACE.to_string(),
        }),
    });
    chart
}

pub fn test_config() -> ControllerConfig {
    ControllerConfig {
        release_wait_secs: 1,
        namespace_wait_secs: 1,
        retry_max_attempts: 1,
        retry_initial_delay_ms: 1,
        retry_max_delay_ms: 2,
        ..ControllerConfig::default()
    }
}

pub fn content(name: &str, namespace: &str, status: ReleaseStatus, version: &str) -> ReleaseContent {
    ReleaseContent {
        name: name.to_string(),
        namespace: namespace.to_string(),
        status,
        version: version.to_string(),
        app_version: Some("1.25.0".to_string()),
        description: format!("release is {status}"),
        revision: 1,
        values: serde_json::Map::new(),
    }
}

pub fn history_entry(revision: i64, status: ReleaseStatus) -> ReleaseHistoryEntry {
    ReleaseHistoryEntry {
        revision,
        status,
        app_version: Some("1.25.0".to_string()),
        version: "1.0.0".to_string(),
        last_deployed: None,
        description: String::new(),
    }
}

#[derive(Debug, Default)]
struct FakeReleaseState {
    releases: HashMap<(String, String), ReleaseContent>,
    history: HashMap<(String, String), Vec<ReleaseHistoryEntry>>,
    pull_error: Option<ReleaseError>,
    operation_error: Option<ReleaseError>,
    /// Content the release is left in when an operation fails
    content_after_failure: Option<ReleaseStatus>,
    operation_delay: Option<Duration>,
    delete_leaves_release: bool,
    calls: Vec<String>,
    installs: Vec<InstallRequest>,
    updates: Vec<UpdateRequest>,
}

#[derive(Debug, Default)]
pub struct FakeReleaseClient {
    state: Mutex<FakeReleaseState>,
}

impl FakeReleaseClient {
    fn lock(&self) -> std::sync::MutexGuard<'_, FakeReleaseState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn with_release(self, content: ReleaseContent) -> Self {
        {
            let mut state = self.lock();
            let key = (content.namespace.clone(), content.name.clone());
            state.history.entry(key.clone()).or_insert_with(|| {
                vec![history_entry(content.revision, content.status)]
            });
            state.releases.insert(key, content);
        }
        self
    }

    pub fn with_history(self, namespace: &str, release: &str, history: Vec<ReleaseHistoryEntry>) -> Self {
        self.lock()
            .history
            .insert((namespace.to_string(), release.to_string()), history);
        self
    }

    pub fn fail_pulls(self, error: ReleaseError) -> Self {
        self.lock().pull_error = Some(error);
        self
    }

    pub fn fail_operations(self, error: ReleaseError, leaves: Option<ReleaseStatus>) -> Self {
        {
            let mut state = self.lock();
            state.operation_error = Some(error);
            state.content_after_failure = leaves;
        }
        self
    }

    pub fn delay_operations(self, delay: Duration) -> Self {
        self.lock().operation_delay = Some(delay);
        self
    }

    pub fn delete_leaves_release(self) -> Self {
        self.lock().delete_leaves_release = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Calls that change the release, excluding reads
    pub fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| {
                ["install", "update", "delete", "rollback"]
                    .iter()
                    .any(|op| c.starts_with(op))
            })
            .collect()
    }

    pub fn installs(&self) -> Vec<InstallRequest> {
        self.lock().installs.clone()
    }

    pub fn updates(&self) -> Vec<UpdateRequest> {
        self.lock().updates.clone()
    }

    pub fn release(&self, namespace: &str, release: &str) -> Option<ReleaseContent> {
        self.lock()
            .releases
            .get(&(namespace.to_string(), release.to_string()))
            .cloned()
    }

    async fn operate(
        &self,
        namespace: &str,
        release: &str,
        values: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), ReleaseError> {
        let delay = self.lock().operation_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.lock();
        let key = (namespace.to_string(), release.to_string());
        let revision = state.releases.get(&key).map_or(1, |c| c.revision + 1);
        if let Some(error) = state.operation_error.clone() {
            if let Some(status) = state.content_after_failure {
                let mut failed = content(release, namespace, status, "1.0.0");
                failed.revision = revision;
                failed.description = "deployment failed".to_string();
                state.releases.insert(key, failed);
            }
            return Err(error);
        }
        let mut deployed = content(release, namespace, ReleaseStatus::Deployed, "1.0.0");
        deployed.revision = revision;
        deployed.values = values;
        state
            .history
            .entry(key.clone())
            .or_default()
            .push(history_entry(revision, ReleaseStatus::Deployed));
        state.releases.insert(key, deployed);
        Ok(())
    }
}

#[async_trait]
impl ReleaseClient for FakeReleaseClient {
    async fn pull_archive(&self, url: &str) -> Result<PathBuf, ReleaseError> {
        let mut state = self.lock();
        state.calls.push(format!("pull {url}"));
        match state.pull_error.clone() {
            Some(e) => Err(e),
            None => Ok(PathBuf::from("/tmp/charts/archive.tgz")),
        }
    }

    async fn load_archive(&self, _path: &Path) -> Result<ChartMetadata, ReleaseError> {
        Ok(ChartMetadata {
            name: "nginx".to_string(),
            version: "1.0.0".to_string(),
            app_version: Some("1.25.0".to_string()),
        })
    }

    async fn install(&self, request: InstallRequest) -> Result<(), ReleaseError> {
        {
            let mut state = self.lock();
            state
                .calls
                .push(format!("install {}/{}", request.namespace, request.release));
            state.installs.push(request.clone());
        }
        self.operate(&request.namespace, &request.release, request.values).await
    }

    async fn update(&self, request: UpdateRequest) -> Result<(), ReleaseError> {
        {
            let mut state = self.lock();
            state
                .calls
                .push(format!("update {}/{}", request.namespace, request.release));
            state.updates.push(request.clone());
        }
        self.operate(&request.namespace, &request.release, request.values).await
    }

    async fn delete(&self, namespace: &str, release: &str, _timeout: Duration) -> Result<(), ReleaseError> {
        let mut state = self.lock();
        state.calls.push(format!("delete {namespace}/{release}"));
        let key = (namespace.to_string(), release.to_string());
        if !state.releases.contains_key(&key) {
            return Err(ReleaseError::ReleaseNotFound(release.to_string()));
        }
        if !state.delete_leaves_release {
            state.releases.remove(&key);
            state.history.remove(&key);
        }
        Ok(())
    }

    async fn rollback(
        &self,
        namespace: &str,
        release: &str,
        revision: i64,
        _timeout: Duration,
    ) -> Result<(), ReleaseError> {
        self.lock()
            .calls
            .push(format!("rollback {namespace}/{release} {revision}"));
        Ok(())
    }

    async fn get_content(&self, namespace: &str, release: &str) -> Result<ReleaseContent, ReleaseError> {
        self.lock()
            .releases
            .get(&(namespace.to_string(), release.to_string()))
            .cloned()
            .ok_or_else(|| ReleaseError::ReleaseNotFound(release.to_string()))
    }

    async fn get_history(
        &self,
        namespace: &str,
        release: &str,
    ) -> Result<Vec<ReleaseHistoryEntry>, ReleaseError> {
        let state = self.lock();
        let key = (namespace.to_string(), release.to_string());
        if !state.releases.contains_key(&key) && !state.history.contains_key(&key) {
            return Err(ReleaseError::ReleaseNotFound(release.to_string()));
        }
        let mut history = state.history.get(&key).cloned().unwrap_or_default();
        history.sort_by_key(|e| e.revision);
        Ok(history)
    }
}

#[derive(Debug, Default)]
struct FakeStoreState {
    charts: HashMap<(String, String), Chart>,
    config_maps: HashMap<(String, String), String>,
    secrets: HashMap<(String, String), String>,
    namespaces: HashSet<String>,
    namespace_labels: HashMap<String, BTreeMap<String, String>>,
    create_namespace_delay: Option<Duration>,
    release_records: Vec<(String, ReleaseRecord)>,
    deleted_records: Vec<String>,
    annotation_patches: Vec<BTreeMap<String, Option<String>>>,
    status_writes: Vec<ChartStatus>,
    status_conflicts: u32,
    annotation_conflicts: u32,
}

#[derive(Debug, Default)]
pub struct FakeRecordStore {
    state: Mutex<FakeStoreState>,
}

impl FakeRecordStore {
    fn lock(&self) -> std::sync::MutexGuard<'_, FakeStoreState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn with_chart(self, chart: &Chart) -> Self {
        self.lock().charts.insert(
            (
                chart.metadata.namespace.clone().unwrap_or_default(),
                chart.metadata.name.clone().unwrap_or_default(),
            ),
            chart.clone(),
        );
        self
    }

    pub fn with_config_map(self, name: &str, values: &str) -> Self {
        self.lock()
            .config_maps
            .insert((CHART_NAMESPACE.to_string(), name.to_string()), values.to_string());
        self
    }

    pub fn with_secret(self, name: &str, values: &str) -> Self {
        self.lock()
            .secrets
            .insert((CHART_NAMESPACE.to_string(), name.to_string()), values.to_string());
        self
    }

    pub fn with_namespace(self, name: &str) -> Self {
        self.lock().namespaces.insert(name.to_string());
        self
    }

    pub fn slow_namespace_creation(self, delay: Duration) -> Self {
        self.lock().create_namespace_delay = Some(delay);
        self
    }

    pub fn with_release_record(self, namespace: &str, record: ReleaseRecord) -> Self {
        self.lock()
            .release_records
            .push((namespace.to_string(), record));
        self
    }

    pub fn conflict_status_writes(self, times: u32) -> Self {
        self.lock().status_conflicts = times;
        self
    }

    pub fn conflict_annotation_patches(self, times: u32) -> Self {
        self.lock().annotation_conflicts = times;
        self
    }

    pub fn annotation_patches(&self) -> Vec<BTreeMap<String, Option<String>>> {
        self.lock().annotation_patches.clone()
    }

    pub fn status_writes(&self) -> Vec<ChartStatus> {
        self.lock().status_writes.clone()
    }

    pub fn deleted_records(&self) -> Vec<String> {
        self.lock().deleted_records.clone()
    }

    pub fn namespace_labels(&self, name: &str) -> Option<BTreeMap<String, String>> {
        self.lock().namespace_labels.get(name).cloned()
    }

    pub fn stored_chart(&self, namespace: &str, name: &str) -> Option<Chart> {
        self.lock()
            .charts
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }
}

#[async_trait]
impl RecordStore for FakeRecordStore {
    async fn get_chart(&self, namespace: &str, name: &str) -> Result<Chart, StoreError> {
        self.lock()
            .charts
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("{namespace}/{name}")))
    }

    async fn patch_chart_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: BTreeMap<String, Option<String>>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        if state.annotation_conflicts > 0 {
            state.annotation_conflicts -= 1;
            return Err(StoreError::Conflict(format!("{namespace}/{name}")));
        }
        if let Some(chart) = state.charts.get_mut(&(namespace.to_string(), name.to_string())) {
            let stored = chart.metadata.annotations.get_or_insert_with(BTreeMap::new);
            for (k, v) in &annotations {
                match v {
                    Some(v) => stored.insert(k.clone(), v.clone()),
                    None => stored.remove(k),
                };
            }
        }
        state.annotation_patches.push(annotations);
        Ok(())
    }

    async fn replace_chart_status(&self, chart: &Chart, status: ChartStatus) -> Result<(), StoreError> {
        let mut state = self.lock();
        if state.status_conflicts > 0 {
            state.status_conflicts -= 1;
            return Err(StoreError::Conflict(chart.key()));
        }
        let key = (
            chart.metadata.namespace.clone().unwrap_or_default(),
            chart.metadata.name.clone().unwrap_or_default(),
        );
        if let Some(stored) = state.charts.get_mut(&key) {
            stored.status = Some(status.clone());
        }
        state.status_writes.push(status);
        Ok(())
    }

    async fn add_finalizer(&self, chart: &Chart, finalizer: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        let key = (
            chart.metadata.namespace.clone().unwrap_or_default(),
            chart.metadata.name.clone().unwrap_or_default(),
        );
        if let Some(stored) = state.charts.get_mut(&key) {
            let finalizers = stored.metadata.finalizers.get_or_insert_with(Vec::new);
            if !finalizers.iter().any(|f| f == finalizer) {
                finalizers.push(finalizer.to_string());
            }
        }
        Ok(())
    }

    async fn remove_finalizer(&self, chart: &Chart, finalizer: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        let key = (
            chart.metadata.namespace.clone().unwrap_or_default(),
            chart.metadata.name.clone().unwrap_or_default(),
        );
        if let Some(stored) = state.charts.get_mut(&key) {
            if let Some(finalizers) = stored.metadata.finalizers.as_mut() {
                finalizers.retain(|f| f != finalizer);
            }
        }
        Ok(())
    }

    async fn get_config_map(&self, namespace: &str, name: &str, _key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .lock()
            .config_maps
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn get_secret(&self, namespace: &str, name: &str, _key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .lock()
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn namespace_exists(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.lock().namespaces.contains(name))
    }

    async fn create_namespace(&self, name: &str, labels: BTreeMap<String, String>) -> Result<(), StoreError> {
        let delay = self.lock().create_namespace_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.lock();
        if !state.namespaces.insert(name.to_string()) {
            return Err(StoreError::AlreadyExists(format!("namespace {name}")));
        }
        state.namespace_labels.insert(name.to_string(), labels);
        Ok(())
    }

    async fn list_release_records(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<ReleaseRecord>, StoreError> {
        let release = label_selector
            .split(',')
            .find_map(|term| term.strip_prefix("name="))
            .unwrap_or_default()
            .to_string();
        Ok(self
            .lock()
            .release_records
            .iter()
            .filter(|(ns, r)| ns == namespace && r.name.contains(&format!(".{release}.v")))
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn delete_release_record(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        state
            .release_records
            .retain(|(ns, r)| !(ns == namespace && r.name == name));
        state.deleted_records.push(name.to_string());
        Ok(())
    }
}
