// Local proxy session: one `kubectl proxy` child process per cluster,
// serving the endpoint the proxy kubeconfig points at.
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::deps::SessionHandler;
use crate::error::Error;
use crate::models::cluster::{ClusterId, MetricsPreferences};

pub struct KubectlProxySession {
    cluster_id: ClusterId,
    kubeconfig_path: String,
    context: String,
    port: u16,
    child: Mutex<Option<Child>>,
    metrics: Mutex<Option<MetricsPreferences>>,
}

impl KubectlProxySession {
    pub fn new(
        cluster_id: impl Into<ClusterId>,
        kubeconfig_path: impl Into<String>,
        context: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            kubeconfig_path: kubeconfig_path.into(),
            context: context.into(),
            port,
            child: Mutex::new(None),
            metrics: Mutex::new(None),
        }
    }

    /// Base URL the proxy kubeconfig should point at.
    pub fn proxy_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Metrics-source settings last handed to this session.
    pub async fn metrics_source(&self) -> Option<MetricsPreferences> {
        self.metrics.lock().await.clone()
    }
}

#[async_trait]
impl SessionHandler for KubectlProxySession {
    /// Kills any existing proxy process first so restart is idempotent.
    async fn restart(&self) -> Result<(), Error> {
        let kubectl = which::which("kubectl")
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| "kubectl".to_string());

        let mut guard = self.child.lock().await;

        if let Some(mut child) = guard.take() {
            let _ = child.kill().await;
        }

        let child = Command::new(&kubectl)
            .arg("proxy")
            .arg(format!("--port={}", self.port))
            .arg("--disable-filter=true")
            .arg(format!("--kubeconfig={}", self.kubeconfig_path))
            .arg(format!("--context={}", self.context))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::session(format!("failed to spawn kubectl proxy: {e}")))?;

        log::info!(
            "session: kubectl proxy started for cluster {} on port {}",
            self.cluster_id,
            self.port
        );
        *guard = Some(child);
        Ok(())
    }

    async fn stop(&self) {
        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            if let Err(error) = child.kill().await {
                log::warn!(
                    "session: failed to kill kubectl proxy for cluster {}: {error}",
                    self.cluster_id
                );
            } else {
                log::info!("session: kubectl proxy stopped for cluster {}", self.cluster_id);
            }
        }
    }

    async fn configure_metrics_source(&self, preferences: Option<&MetricsPreferences>) {
        log::info!(
            "session: metrics source updated for cluster {}: {:?}",
            self.cluster_id,
            preferences.and_then(|p| p.provider.as_deref()),
        );
        *self.metrics.lock().await = preferences.cloned();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn proxy_url_targets_loopback_on_the_configured_port() {
        let session = KubectlProxySession::new("c-1", "/tmp/kubeconfig", "prod", 8123);
        assert_eq!(session.proxy_url(), "http://127.0.0.1:8123");
    }

    #[tokio::test]
    async fn metrics_source_round_trips() {
        let session = KubectlProxySession::new("c-1", "/tmp/kubeconfig", "prod", 8001);
        assert!(session.metrics_source().await.is_none());

        let prefs = MetricsPreferences {
            provider: Some("prometheus".into()),
            address: Some("http://prometheus.monitoring:9090".into()),
        };
        session.configure_metrics_source(Some(&prefs)).await;
        assert_eq!(session.metrics_source().await, Some(prefs));
    }

    #[tokio::test]
    async fn stop_without_a_running_proxy_is_a_no_op() {
        let session = KubectlProxySession::new("c-1", "/tmp/kubeconfig", "prod", 8001);
        session.stop().await;
    }
}
