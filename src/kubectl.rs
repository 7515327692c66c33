// Best-effort kubectl provisioning. Failures are logged by the caller
// and never surface as connection failures.
use std::ffi::OsString;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::deps::ToolProvisioner;
use crate::error::Error;

/// Resolves kubectl from PATH. A download-on-demand provisioner can slot
/// in behind the same trait later.
#[derive(Default)]
pub struct WhichKubectl {
    /// Overrides the PATH lookup when set.
    search_path: Option<OsString>,
}

impl WhichKubectl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search_path(search_path: impl Into<OsString>) -> Self {
        Self {
            search_path: Some(search_path.into()),
        }
    }

    fn resolve(&self) -> Result<PathBuf, which::Error> {
        match &self.search_path {
            Some(paths) => which::which_in("kubectl", Some(paths), "/"),
            None => which::which("kubectl"),
        }
    }
}

#[async_trait]
impl ToolProvisioner for WhichKubectl {
    async fn ensure(&self, cluster_version: &str) -> Result<PathBuf, Error> {
        let path = self
            .resolve()
            .map_err(|e| Error::tool(format!("kubectl not found on PATH: {e}")))?;
        log::info!(
            "kubectl: using {} for cluster version {cluster_version}",
            path.display()
        );
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_kubectl_is_a_tool_error() {
        // An empty search path cannot resolve anything.
        let provisioner = WhichKubectl::with_search_path("");
        let result = provisioner.ensure("v1.30.2").await;
        assert!(matches!(result, Err(Error::Tool(_))));
    }
}
