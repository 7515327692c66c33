// File-based proxy credential lifecycle: a minimized kubeconfig that
// points every probe at the local proxy session instead of carrying the
// user's raw credentials. Created lazily on first access, removed by
// `clear`, regenerated with the current default namespace afterwards.
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use kube::config::Kubeconfig;

use crate::deps::ProxyKubeconfigManager;
use crate::error::Error;
use crate::models::cluster::ClusterId;

pub struct FileProxyKubeconfig {
    cluster_id: ClusterId,
    source_path: PathBuf,
    context: String,
    /// Base URL of the local proxy session, e.g. `http://127.0.0.1:8001`.
    proxy_url: String,
    directory: PathBuf,
    default_namespace: Mutex<Option<String>>,
}

impl FileProxyKubeconfig {
    pub fn new(
        cluster_id: impl Into<ClusterId>,
        source_path: impl Into<PathBuf>,
        context: impl Into<String>,
        proxy_url: impl Into<String>,
        directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            source_path: source_path.into(),
            context: context.into(),
            proxy_url: proxy_url.into(),
            directory: directory.into(),
            default_namespace: Mutex::new(None),
        }
    }

    /// Default location for generated proxy kubeconfigs.
    pub fn default_directory() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("kubelink")
            .join("proxy-kubeconfigs")
    }

    fn file_path(&self) -> PathBuf {
        self.directory.join(format!("{}.yaml", self.cluster_id))
    }

    fn render(&self) -> Result<String, Error> {
        // Validate that the context still exists in the source file; a
        // stale context name should fail loudly, not produce a dangling
        // proxy config.
        let source = Kubeconfig::read_from(&self.source_path)
            .map_err(|e| Error::proxy(format!("{}: {e}", self.source_path.display())))?;
        if !source.contexts.iter().any(|named| named.name == self.context) {
            return Err(Error::proxy(format!(
                "context {:?} not found in {}",
                self.context,
                self.source_path.display()
            )));
        }

        let namespace = self
            .default_namespace
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();

        let mut context_entry = serde_json::json!({
            "cluster": self.context,
            "user": "proxy",
        });
        if let Some(namespace) = namespace {
            context_entry["namespace"] = serde_json::Value::String(namespace);
        }

        let doc = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Config",
            "current-context": self.context,
            "clusters": [{
                "name": self.context,
                "cluster": {
                    "server": self.proxy_url,
                    "insecure-skip-tls-verify": true,
                },
            }],
            "users": [{ "name": "proxy", "user": {} }],
            "contexts": [{
                "name": self.context,
                "context": context_entry,
            }],
        });

        Ok(serde_yaml::to_string(&doc)?)
    }

    fn generate(&self, path: &Path) -> Result<(), Error> {
        std::fs::create_dir_all(&self.directory)?;
        let rendered = self.render()?;
        std::fs::write(path, rendered)?;
        log::info!(
            "proxy: wrote kubeconfig for cluster {} — {}",
            self.cluster_id,
            path.display()
        );
        Ok(())
    }
}

#[async_trait]
impl ProxyKubeconfigManager for FileProxyKubeconfig {
    async fn get_path(&self) -> Result<PathBuf, Error> {
        let path = self.file_path();
        if !path.exists() {
            self.generate(&path)?;
        }
        Ok(path)
    }

    async fn clear(&self) -> Result<(), Error> {
        let path = self.file_path();
        if path.exists() {
            std::fs::remove_file(&path)?;
            log::info!(
                "proxy: cleared kubeconfig for cluster {} — {}",
                self.cluster_id,
                path.display()
            );
        }
        Ok(())
    }

    /// Namespace written into the generated context. Takes effect on the
    /// next generation (the caller clears first).
    fn set_default_namespace(&self, namespace: Option<&str>) {
        let mut guard = self
            .default_namespace
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = namespace.map(str::to_string);
    }
}
