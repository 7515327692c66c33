// Resource-kind descriptors used by discovery and the authorization prober.
use serde::{Deserialize, Serialize};

/// One resource kind known to the cluster, as reported by API discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResource {
    /// API group; empty string for the core group.
    pub group: String,
    pub kind: String,
    /// Plural name used on the wire, e.g. `deployments`.
    pub plural_name: String,
    pub namespaced: bool,
}

impl ApiResource {
    pub fn new(group: &str, kind: &str, plural_name: &str, namespaced: bool) -> Self {
        Self {
            group: group.to_string(),
            kind: kind.to_string(),
            plural_name: plural_name.to_string(),
            namespaced,
        }
    }
}

/// Formats a descriptor as `group/kind`, or bare `kind` for the core group.
pub fn format_api_resource(resource: &ApiResource) -> String {
    if resource.group.is_empty() {
        resource.kind.clone()
    } else {
        format!("{}/{}", resource.group, resource.kind)
    }
}
