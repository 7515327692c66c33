// Kubeconfig-derived types shared with the frontend store.
use serde::{Deserialize, Serialize};

/// One context from the merged kubeconfig, enriched with the fields the
/// registration flow needs to build a cluster model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeContext {
    pub name: String,
    pub cluster: String,
    pub user: String,
    pub namespace: Option<String>,
    pub is_active: bool,
    /// API server URL — resolved into the cluster record's `apiUrl`
    pub server_url: Option<String>,
    /// Absolute path of the kubeconfig file that contains this context
    pub source_file: Option<String>,
}
