//! # Pipeline Resources
//!
//! The handlers a pass runs, in order:
//!
//! 1. `namespace` - make sure the release namespace exists
//! 2. `history_guard` - detect and prune runs of failed revisions
//! 3. `release` - install, upgrade, roll back or uninstall the release
//! 4. `status` - write the observed state back to the Chart

pub mod history_guard;
pub mod namespace;
pub mod release;
pub mod status;

#[cfg(test)]
pub mod test_support;

pub use history_guard::HistoryGuard;
pub use namespace::NamespaceResource;
pub use release::ReleaseResource;
pub use status::StatusResource;

use crate::config::ControllerConfig;
use crate::controller::pipeline::{CrudHandler, Handler};
use crate::crd::Chart;
use crate::helm::CredentialPair;
use crate::store::RecordStore;
use kube::ResourceExt;
use std::sync::Arc;

/// `(namespace, name)` of the Chart object itself
pub fn chart_coordinates(chart: &Chart) -> (String, String) {
    (chart.namespace().unwrap_or_default(), chart.name_any())
}

/// Handlers in pipeline order
pub fn build_handlers(
    store: &Arc<dyn RecordStore>,
    credentials: &CredentialPair,
    config: &ControllerConfig,
) -> Vec<Arc<dyn Handler>> {
    vec![
        Arc::new(NamespaceResource::new(Arc::clone(store), config.namespace_wait())),
        Arc::new(HistoryGuard::new(Arc::clone(store), credentials.clone())),
        Arc::new(CrudHandler::new(ReleaseResource::new(
            Arc::clone(store),
            credentials.clone(),
            config.clone(),
        ))),
        Arc::new(StatusResource::new(Arc::clone(store), credentials.clone())),
    ]
}
