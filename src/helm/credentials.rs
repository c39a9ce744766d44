//! # Credential Pair
//!
//! Routes each Chart to the privileged or restricted release client.
//!
//! Releases targeting the control-plane namespace are managed with the
//! controller's own credentials. Everything else goes through the restricted
//! client so tenant charts cannot escalate through the controller. Deletion
//! always uses the privileged client so cleanup succeeds wherever the release
//! was created.

use super::ReleaseClient;
use crate::crd::Chart;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct CredentialPair {
    privileged: Arc<dyn ReleaseClient>,
    restricted: Arc<dyn ReleaseClient>,
    control_plane_namespace: String,
}

impl CredentialPair {
    pub fn new(
        privileged: Arc<dyn ReleaseClient>,
        restricted: Arc<dyn ReleaseClient>,
        control_plane_namespace: impl Into<String>,
    ) -> Self {
        Self {
            privileged,
            restricted,
            control_plane_namespace: control_plane_namespace.into(),
        }
    }

    /// Client for a Chart's create/update path
    pub fn select(&self, chart: &Chart) -> Arc<dyn ReleaseClient> {
        self.select_for_namespace(chart.release_namespace())
    }

    pub fn select_for_namespace(&self, namespace: &str) -> Arc<dyn ReleaseClient> {
        if self.is_control_plane(namespace) {
            Arc::clone(&self.privileged)
        } else {
            Arc::clone(&self.restricted)
        }
    }

    /// Client for deletion paths
    pub fn privileged(&self) -> Arc<dyn ReleaseClient> {
        Arc::clone(&self.privileged)
    }

    pub fn is_control_plane(&self, namespace: &str) -> bool {
        namespace == self.control_plane_namespace
    }

    pub fn control_plane_namespace(&self) -> &str {
        &self.control_plane_namespace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::resources::test_support::{chart, FakeReleaseClient};

    fn pair() -> (CredentialPair, Arc<FakeReleaseClient>, Arc<FakeReleaseClient>) {
        let privileged = Arc::new(FakeReleaseClient::default());
        let restricted = Arc::new(FakeReleaseClient::default());
        let pair = CredentialPair::new(
            privileged.clone(),
            restricted.clone(),
            "microscaler-system",
        );
        (pair, privileged, restricted)
    }

    fn same(a: &Arc<dyn ReleaseClient>, b: &Arc<FakeReleaseClient>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
    }

    #[test]
    fn test_control_plane_chart_uses_privileged() {
        let (pair, privileged, _) = pair();
        let c = chart("ingress", "microscaler-system");
        assert!(same(&pair.select(&c), &privileged));
    }

    #[test]
    fn test_tenant_chart_uses_restricted() {
        let (pair, _, restricted) = pair();
        let c = chart("shop", "tenant-a");
        assert!(same(&pair.select(&c), &restricted));
    }

    #[test]
    fn test_privileged_ignores_namespace() {
        let (pair, privileged, _) = pair();
        assert!(same(&pair.privileged(), &privileged));
    }
}
