// Rust structs mirroring the cluster model persisted by the frontend store.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Opaque cluster identifier, assigned at registration and never reused.
pub type ClusterId = String;

/// Well-known metadata keys merged into [`ClusterMetadata`].
pub mod metadata_key {
    pub const VERSION: &str = "version";
    pub const DISTRIBUTION: &str = "distribution";
    pub const LAST_SEEN: &str = "lastSeen";
}

/// Free-form descriptive metadata, merged best-effort from detectors.
pub type ClusterMetadata = HashMap<String, serde_json::Value>;

/// Metrics-source settings handed to the session handler when they change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsPreferences {
    pub provider: Option<String>,
    pub address: Option<String>,
}

/// User-editable cluster preferences.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPreferences {
    /// Display name override; falls back to the context name.
    pub cluster_name: Option<String>,
    /// Metric names the user has hidden in the dashboard.
    pub hidden_metrics: Option<Vec<String>>,
    /// Namespace written into the proxy kubeconfig's active context.
    pub default_namespace: Option<String>,
    /// Image used when provisioning a node shell pod.
    pub node_shell_image: Option<String>,
    /// Pull secret for the node shell image.
    pub image_pull_secret: Option<String>,
    pub metrics: Option<MetricsPreferences>,
}

pub const INITIAL_NODE_SHELL_IMAGE: &str = "docker.io/alpine:3.13";

/// Full persisted cluster model, identity included.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterModel {
    pub id: ClusterId,
    pub context_name: String,
    pub kube_config_path: String,
    #[serde(default)]
    pub preferences: ClusterPreferences,
    #[serde(default)]
    pub metadata: ClusterMetadata,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Namespaces the user declared accessible in the cluster settings.
    /// When non-empty this list always wins over discovery.
    #[serde(default)]
    pub accessible_namespaces: Vec<String>,
}

/// Update payload for [`ClusterModel`] — everything but the id.
/// `None` fields keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateClusterModel {
    pub context_name: String,
    pub kube_config_path: String,
    pub preferences: Option<ClusterPreferences>,
    pub metadata: Option<ClusterMetadata>,
    pub labels: Option<HashMap<String, String>>,
    pub accessible_namespaces: Option<Vec<String>>,
}

impl UpdateClusterModel {
    /// Shape validation, run before any field is applied so that a
    /// rejected update leaves the record untouched.
    pub fn validate(&self) -> Result<(), Error> {
        if self.context_name.trim().is_empty() {
            return Err(Error::config("contextName must not be empty"));
        }
        if self.kube_config_path.trim().is_empty() {
            return Err(Error::config("kubeConfigPath must not be empty"));
        }
        Ok(())
    }
}

/// Validates a cluster id at construction time.
pub fn validate_cluster_id(id: &str) -> Result<(), Error> {
    if id.trim().is_empty() {
        return Err(Error::config("cluster id must be a non-empty string"));
    }
    Ok(())
}

/// Serializable runtime state, used for cross-process state sync.
/// Sets are carried as vectors; consumers treat them as order-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterState {
    pub api_url: String,
    pub online: bool,
    pub accessible: bool,
    pub ready: bool,
    pub disconnected: bool,
    pub is_admin: bool,
    pub is_global_watch_enabled: bool,
    pub allowed_namespaces: Vec<String>,
    /// Formatted as `group/kind`, or bare `kind` for the core group.
    pub allowed_resources: Vec<String>,
}

/// Configuration resolved once from the kubeconfig file at construction.
#[derive(Debug, Clone)]
pub struct ClusterConfigData {
    pub cluster_server_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_model_rejects_empty_context_name() {
        let update = UpdateClusterModel {
            context_name: "  ".into(),
            kube_config_path: "/home/user/.kube/config".into(),
            ..Default::default()
        };
        assert!(update.validate().is_err());
    }

    #[test]
    fn update_model_rejects_empty_kubeconfig_path() {
        let update = UpdateClusterModel {
            context_name: "prod".into(),
            kube_config_path: String::new(),
            ..Default::default()
        };
        assert!(update.validate().is_err());
    }

    #[test]
    fn update_model_accepts_minimal_shape() {
        let update = UpdateClusterModel {
            context_name: "prod".into(),
            kube_config_path: "/home/user/.kube/config".into(),
            ..Default::default()
        };
        assert!(update.validate().is_ok());
    }

    #[test]
    fn cluster_id_must_not_be_blank() {
        assert!(validate_cluster_id("").is_err());
        assert!(validate_cluster_id("   ").is_err());
        assert!(validate_cluster_id("c-1").is_ok());
    }

    #[test]
    fn cluster_state_round_trips_through_json() {
        let state = ClusterState {
            api_url: "https://10.0.0.1:6443".into(),
            online: true,
            accessible: true,
            ready: true,
            disconnected: false,
            is_admin: false,
            is_global_watch_enabled: true,
            allowed_namespaces: vec!["default".into(), "kube-system".into()],
            allowed_resources: vec!["pods".into(), "apps/deployments".into()],
        };
        let json = serde_json::to_string(&state).unwrap();
        let back: ClusterState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, back);
    }

    #[test]
    fn model_deserializes_with_defaults() {
        let model: ClusterModel = serde_json::from_str(
            r#"{"id":"c-1","contextName":"prod","kubeConfigPath":"/tmp/kubeconfig"}"#,
        )
        .unwrap();
        assert!(model.accessible_namespaces.is_empty());
        assert!(model.preferences.cluster_name.is_none());
    }
}
