// Collaborator contracts the state machine drives. The production
// implementations live in remote.rs / session.rs / proxy.rs / kubectl.rs;
// tests provide scripted ones.
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::detectors::DetectorRegistry;
use crate::error::{Error, NamespaceListError};
use crate::events::EventBus;
use crate::models::cluster::MetricsPreferences;
use crate::models::rbac::ApiResource;
use crate::status::{ReachabilityFailure, ReachableVersion};

/// One `can-i` style scalar authorization check.
#[derive(Debug, Clone)]
pub struct AccessReview {
    pub verb: &'static str,
    pub resource: &'static str,
    pub namespace: Option<&'static str>,
}

/// Per-namespace list-permission predicate, built from one probe.
#[derive(Debug, Clone)]
pub enum ListPermission {
    /// A wildcard rule covers every resource in the namespace.
    All,
    /// Only the named `group/plural` pairs are listable.
    Some(HashSet<(String, String)>),
}

impl ListPermission {
    /// `pairs` entries may use `*` for either side; a wildcard on both
    /// sides should be expressed as `All` instead.
    pub fn allows(&self, resource: &ApiResource) -> bool {
        match self {
            ListPermission::All => true,
            ListPermission::Some(pairs) => {
                let group = resource.group.as_str();
                let plural = resource.plural_name.as_str();
                pairs.iter().any(|(rule_group, rule_plural)| {
                    (rule_group == group || rule_group == "*")
                        && (rule_plural == plural || rule_plural == "*")
                })
            }
        }
    }
}

/// Everything the state machine asks of a reachable cluster endpoint.
/// One instance per (kubeconfig, context) pair; obtained from a
/// [`ConnectionFactory`] with the proxy kubeconfig path each cycle so
/// that credential changes are picked up.
#[async_trait]
pub trait ClusterConnection: Send + Sync {
    /// Confirms the endpoint responds and returns its reported version.
    /// The failure side carries the transport's status/timeout flags for
    /// classification; this call itself never errors.
    async fn detect_reachability(&self) -> Result<ReachableVersion, ReachabilityFailure>;

    /// Probes which resources are listable in one namespace.
    async fn list_permission(&self, namespace: &str) -> Result<ListPermission, Error>;

    /// Scalar authorization check.
    async fn can_i(&self, review: &AccessReview) -> Result<bool, Error>;

    /// Namespaces visible to the caller, in API order.
    async fn list_namespaces(&self) -> Result<Vec<String>, NamespaceListError>;

    /// Resource kinds the endpoint knows, via API discovery.
    async fn list_api_resources(&self) -> Result<Vec<ApiResource>, Error>;

    /// Namespace configured on the active context, if any. Used as the
    /// fallback when namespace listing fails.
    fn context_namespace(&self) -> Option<String>;
}

#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(
        &self,
        kubeconfig_path: &Path,
        context: &str,
    ) -> Result<Arc<dyn ClusterConnection>, Error>;
}

/// Local proxy session for one cluster (the process that serves the
/// endpoint the proxy kubeconfig points at).
#[async_trait]
pub trait SessionHandler: Send + Sync {
    async fn restart(&self) -> Result<(), Error>;
    async fn stop(&self);
    async fn configure_metrics_source(&self, preferences: Option<&MetricsPreferences>);
}

/// Locally-scoped credential file used for all probes. Created lazily on
/// first `get_path`, removed by `clear`. The default namespace written
/// into the generated context is pushed through `set_default_namespace`
/// and takes effect on the next generation.
#[async_trait]
pub trait ProxyKubeconfigManager: Send + Sync {
    async fn get_path(&self) -> Result<PathBuf, Error>;
    async fn clear(&self) -> Result<(), Error>;
    fn set_default_namespace(&self, namespace: Option<&str>);
}

/// Best-effort local CLI tool provisioning, matched to the cluster version.
#[async_trait]
pub trait ToolProvisioner: Send + Sync {
    async fn ensure(&self, cluster_version: &str) -> Result<PathBuf, Error>;
}

/// Refresh cadence for the background timers. Injectable so tests can
/// run with short intervals.
#[derive(Debug, Clone, Copy)]
pub struct RefreshIntervals {
    /// Connectivity refresh (reachability + classification).
    pub connection: Duration,
    /// Accessibility + metadata refresh; only fires while accessible.
    pub accessibility: Duration,
}

impl Default for RefreshIntervals {
    fn default() -> Self {
        Self {
            connection: Duration::from_secs(30),
            accessibility: Duration::from_secs(15 * 60),
        }
    }
}

/// Bundle of collaborators wired into each cluster at construction.
#[derive(Clone)]
pub struct ClusterDependencies {
    pub connections: Arc<dyn ConnectionFactory>,
    pub session: Arc<dyn SessionHandler>,
    pub proxy_kubeconfig: Arc<dyn ProxyKubeconfigManager>,
    pub tools: Arc<dyn ToolProvisioner>,
    pub detectors: Arc<DetectorRegistry>,
    pub events: EventBus,
    pub intervals: RefreshIntervals,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_permission_allows_everything() {
        let permission = ListPermission::All;
        let pods = ApiResource::new("", "Pod", "pods", true);
        assert!(permission.allows(&pods));
    }

    #[test]
    fn scoped_permission_matches_group_and_plural() {
        let mut pairs = HashSet::new();
        pairs.insert(("apps".to_string(), "deployments".to_string()));
        let permission = ListPermission::Some(pairs);

        let deploys = ApiResource::new("apps", "Deployment", "deployments", true);
        let pods = ApiResource::new("", "Pod", "pods", true);
        assert!(permission.allows(&deploys));
        assert!(!permission.allows(&pods));
    }
}
