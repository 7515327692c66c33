// Bounded-concurrency authorization probing: which resource kinds are
// listable in at least one allowed namespace.
use futures::stream::{self, StreamExt, TryStreamExt};

use crate::deps::{ClusterConnection, ListPermission};
use crate::models::rbac::{format_api_resource, ApiResource};

/// Ceiling on simultaneous in-flight namespace probes; excess probes
/// queue behind completions so the endpoint never sees a request storm.
pub const PROBE_CONCURRENCY: usize = 5;

/// Computes the formatted allowed-resource set.
///
/// One list-permission probe per namespace, at most `limit` in flight; a
/// resource kind is retained when ANY namespace's predicate accepts it.
/// Empty namespace set: empty result, zero probes. Any probe error:
/// empty result — partial authorization data is unsafe to expose.
pub async fn request_allowed_resources(
    connection: &dyn ClusterConnection,
    namespaces: &[String],
    known_resources: &[ApiResource],
    limit: usize,
) -> Vec<String> {
    if namespaces.is_empty() {
        return Vec::new();
    }

    let probes: Vec<_> = namespaces
        .iter()
        .map(|namespace| connection.list_permission(namespace))
        .collect();
    let probes = stream::iter(probes).buffered(limit.max(1));

    let permissions: Vec<ListPermission> = match probes.try_collect().await {
        Ok(permissions) => permissions,
        Err(error) => {
            log::warn!("authz: namespace permission probe failed, hiding all resources: {error}");
            return Vec::new();
        }
    };

    known_resources
        .iter()
        .filter(|resource| permissions.iter().any(|permission| permission.allows(resource)))
        .map(format_api_resource)
        .collect()
}
