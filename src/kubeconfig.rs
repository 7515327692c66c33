// Kubeconfig discovery and resolution: find the user's config files,
// merge them with kubectl semantics, enumerate contexts for cluster
// registration, and resolve the server URL a record's `apiUrl` is pinned
// to at construction.
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use kube::config::Kubeconfig;

use crate::error::Error;
use crate::models::cluster::ClusterConfigData;
use crate::models::k8s::KubeContext;

/// Merges `extra` into `base` by extending clusters, auth_infos, and contexts.
/// `base.current_context` wins; `extra.current_context` is used only if base has none.
pub fn merge_kubeconfig(mut base: Kubeconfig, extra: Kubeconfig) -> Kubeconfig {
    base.clusters.extend(extra.clusters);
    base.auth_infos.extend(extra.auth_infos);
    base.contexts.extend(extra.contexts);
    if base.current_context.is_none() {
        base.current_context = extra.current_context;
    }
    base
}

/// Returns all regular, non-hidden files in `dir`, sorted alphabetically.
/// Skips subdirectories and any file whose name begins with '.'.
fn scan_kube_dir(dir: &Path) -> Vec<PathBuf> {
    let mut paths = Vec::new();

    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            log::warn!("kubeconfig: cannot read directory {}: {e}", dir.display());
            return paths;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();

        // Skip subdirectories (cache/, http-cache/, etc.)
        if path.is_dir() {
            continue;
        }

        // Skip hidden files (.DS_Store, .gitconfig, etc.)
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if name.starts_with('.') {
            continue;
        }

        paths.push(path);
    }

    // Deterministic ordering so logs are easy to follow
    paths.sort();
    paths
}

/// Tries to load each path as a kubeconfig and merges all that succeed,
/// remembering which file each context came from.
fn load_from_paths(paths: &[PathBuf]) -> Option<(Kubeconfig, HashMap<String, PathBuf>)> {
    let mut merged: Option<Kubeconfig> = None;
    let mut sources: HashMap<String, PathBuf> = HashMap::new();

    for path in paths {
        if !path.exists() {
            log::info!("kubeconfig: skip (not found) — {}", path.display());
            continue;
        }

        match Kubeconfig::read_from(path) {
            Ok(cfg) => {
                log::info!(
                    "kubeconfig: ok ({} context(s)) — {}",
                    cfg.contexts.len(),
                    path.display()
                );
                for named in &cfg.contexts {
                    sources.entry(named.name.clone()).or_insert_with(|| path.clone());
                }
                merged = Some(match merged.take() {
                    None => cfg,
                    Some(base) => merge_kubeconfig(base, cfg),
                });
            }
            Err(e) => {
                // Not a kubeconfig — expected when scanning all files in ~/.kube
                log::info!("kubeconfig: skip (parse error: {e}) — {}", path.display());
            }
        }
    }

    merged.map(|cfg| (cfg, sources))
}

/// Loads the merged kubeconfig with kubectl semantics.
///
/// Resolution order:
/// 1. If KUBECONFIG is set, delegate to `Kubeconfig::read()` which merges
///    every listed file.
/// 2. Otherwise scan ~/.kube for ALL regular files, parse each candidate,
///    and merge every valid result — dropping a new config file into
///    ~/.kube is enough to make its clusters appear.
///
/// Returns `None` — not an error — when no kubeconfig can be found.
pub fn load_merged() -> Option<(Kubeconfig, HashMap<String, PathBuf>)> {
    let kube_env = std::env::var("KUBECONFIG").unwrap_or_default();

    if !kube_env.is_empty() {
        let sep = if cfg!(windows) { ';' } else { ':' };
        let paths: Vec<PathBuf> = kube_env
            .split(sep)
            .filter(|part| !part.trim().is_empty())
            .map(|part| PathBuf::from(part.trim()))
            .collect();
        return load_from_paths(&paths);
    }

    let home = match dirs::home_dir() {
        Some(h) => h,
        None => {
            log::warn!("kubeconfig: cannot determine home directory");
            return None;
        }
    };

    let kube_dir = home.join(".kube");
    log::info!(
        "kubeconfig: KUBECONFIG not set — scanning {}",
        kube_dir.display()
    );
    load_from_paths(&scan_kube_dir(&kube_dir))
}

/// Enumerates contexts for the cluster registration flow.
pub fn contexts() -> Vec<KubeContext> {
    let Some((kubeconfig, sources)) = load_merged() else {
        return Vec::new();
    };
    contexts_of(&kubeconfig, &sources)
}

/// Pure half of [`contexts`], split out so tests can drive it with an
/// in-memory kubeconfig.
pub fn contexts_of(
    kubeconfig: &Kubeconfig,
    sources: &HashMap<String, PathBuf>,
) -> Vec<KubeContext> {
    let current = kubeconfig.current_context.clone().unwrap_or_default();

    // cluster-name → server-URL lookup from the clusters stanza
    let cluster_servers: HashMap<&str, String> = kubeconfig
        .clusters
        .iter()
        .filter_map(|nc| {
            let server = nc.cluster.as_ref()?.server.clone()?;
            Some((nc.name.as_str(), server))
        })
        .collect();

    kubeconfig
        .contexts
        .iter()
        .filter_map(|named| {
            let ctx = named.context.as_ref()?;
            Some(KubeContext {
                name: named.name.clone(),
                cluster: ctx.cluster.clone(),
                user: ctx.user.clone().unwrap_or_default(),
                namespace: ctx.namespace.clone(),
                is_active: named.name == current,
                server_url: cluster_servers.get(ctx.cluster.as_str()).cloned(),
                source_file: sources
                    .get(&named.name)
                    .map(|path| path.display().to_string()),
            })
        })
        .collect()
}

/// Resolves the API server URL for `context` in an already-parsed
/// kubeconfig.
pub fn resolve_server_url(kubeconfig: &Kubeconfig, context: &str) -> Result<String, Error> {
    let cluster_name = kubeconfig
        .contexts
        .iter()
        .find(|named| named.name == context)
        .and_then(|named| named.context.as_ref())
        .map(|ctx| ctx.cluster.clone())
        .ok_or_else(|| Error::kubeconfig(format!("context {context:?} not found")))?;

    kubeconfig
        .clusters
        .iter()
        .find(|named| named.name == cluster_name)
        .and_then(|named| named.cluster.as_ref())
        .and_then(|cluster| cluster.server.clone())
        .ok_or_else(|| {
            Error::kubeconfig(format!("cluster {cluster_name:?} has no server URL"))
        })
}

/// Namespace configured on `context`, if any.
pub fn context_namespace(kubeconfig: &Kubeconfig, context: &str) -> Option<String> {
    kubeconfig
        .contexts
        .iter()
        .find(|named| named.name == context)
        .and_then(|named| named.context.as_ref())
        .and_then(|ctx| ctx.namespace.clone())
}

impl ClusterConfigData {
    /// Reads `path` once and resolves the server URL for `context`. The
    /// result is pinned into the cluster record and never re-read.
    pub fn resolve(path: &Path, context: &str) -> Result<Self, Error> {
        let kubeconfig = Kubeconfig::read_from(path)
            .map_err(|e| Error::kubeconfig(format!("{}: {e}", path.display())))?;
        let cluster_server_url = resolve_server_url(&kubeconfig, context)?;
        Ok(Self { cluster_server_url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Kubeconfig {
        serde_yaml::from_str(
            r#"
apiVersion: v1
kind: Config
current-context: prod
clusters:
- name: prod-cluster
  cluster:
    server: https://10.0.0.1:6443
- name: dev-cluster
  cluster:
    server: https://127.0.0.1:6443
contexts:
- name: prod
  context:
    cluster: prod-cluster
    user: admin
    namespace: team-a
- name: dev
  context:
    cluster: dev-cluster
    user: dev
users:
- name: admin
  user: {}
- name: dev
  user: {}
"#,
        )
        .unwrap()
    }

    #[test]
    fn resolves_server_url_through_the_context() {
        let url = resolve_server_url(&sample(), "prod").unwrap();
        assert_eq!(url, "https://10.0.0.1:6443");
    }

    #[test]
    fn unknown_context_is_a_kubeconfig_error() {
        let err = resolve_server_url(&sample(), "staging").unwrap_err();
        assert!(err.to_string().contains("staging"));
    }

    #[test]
    fn context_namespace_is_optional() {
        assert_eq!(context_namespace(&sample(), "prod").as_deref(), Some("team-a"));
        assert_eq!(context_namespace(&sample(), "dev"), None);
    }

    #[test]
    fn contexts_mark_the_active_one_and_carry_server_urls() {
        let contexts = contexts_of(&sample(), &HashMap::new());
        assert_eq!(contexts.len(), 2);

        let prod = contexts.iter().find(|c| c.name == "prod").unwrap();
        assert!(prod.is_active);
        assert_eq!(prod.server_url.as_deref(), Some("https://10.0.0.1:6443"));
        assert_eq!(prod.namespace.as_deref(), Some("team-a"));

        let dev = contexts.iter().find(|c| c.name == "dev").unwrap();
        assert!(!dev.is_active);
    }

    #[test]
    fn merge_prefers_the_base_current_context() {
        let mut base = sample();
        base.current_context = Some("prod".into());
        let mut extra = sample();
        extra.current_context = Some("dev".into());

        let merged = merge_kubeconfig(base, extra);
        assert_eq!(merged.current_context.as_deref(), Some("prod"));
        assert_eq!(merged.contexts.len(), 4);
    }

    #[test]
    fn merge_fills_a_missing_current_context_from_extra() {
        let mut base = sample();
        base.current_context = None;
        let merged = merge_kubeconfig(base, sample());
        assert_eq!(merged.current_context.as_deref(), Some("prod"));
    }
}
