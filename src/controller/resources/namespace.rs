//! Ensures the release namespace exists before anything is installed into it.

use crate::constants::{FIELD_MANAGER, LABEL_MANAGED_BY};
use crate::controller::context::PassContext;
use crate::controller::pipeline::{Flow, Handler};
use crate::controller::reconciler::ReconcilerError;
use crate::crd::Chart;
use crate::store::{RecordStore, StoreError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct NamespaceResource {
    store: Arc<dyn RecordStore>,
    /// How long a pass waits for the create call
    wait: Duration,
}

impl NamespaceResource {
    pub fn new(store: Arc<dyn RecordStore>, wait: Duration) -> Self {
        Self { store, wait }
    }
}

#[async_trait]
impl Handler for NamespaceResource {
    fn name(&self) -> &'static str {
        "namespace"
    }

    async fn ensure_created(
        &self,
        chart: &Chart,
        _ctx: &mut PassContext,
    ) -> Result<Flow, ReconcilerError> {
        let namespace = chart.release_namespace().to_string();
        if self.store.namespace_exists(&namespace).await? {
            debug!("Namespace {} exists", namespace);
            return Ok(Flow::Continue);
        }

        let labels = BTreeMap::from([(LABEL_MANAGED_BY.to_string(), FIELD_MANAGER.to_string())]);
        let store = Arc::clone(&self.store);
        let task_namespace = namespace.clone();
        let handle =
            tokio::spawn(async move { store.create_namespace(&task_namespace, labels).await });

        match tokio::time::timeout(self.wait, handle).await {
            Err(_) => {
                warn!(
                    namespace = %namespace,
                    wait_secs = self.wait.as_secs(),
                    "Namespace creation still pending, cancelling pass"
                );
                Ok(Flow::Cancel)
            }
            Ok(Err(join_error)) => Err(ReconcilerError::Unknown(format!(
                "namespace {namespace} creation did not complete: {join_error}"
            ))),
            Ok(Ok(Ok(()))) => {
                info!(namespace = %namespace, "Created namespace");
                Ok(Flow::Continue)
            }
            Ok(Ok(Err(StoreError::AlreadyExists(_)))) => {
                debug!("Namespace {} created concurrently", namespace);
                Ok(Flow::Continue)
            }
            Ok(Ok(Err(e))) => Err(e.into()),
        }
    }

    /// Namespaces outlive their Charts
    async fn ensure_deleted(
        &self,
        _chart: &Chart,
        _ctx: &mut PassContext,
    ) -> Result<Flow, ReconcilerError> {
        Ok(Flow::Continue)
    }
}
