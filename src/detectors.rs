// Best-effort descriptive metadata detection. Detector failures are
// logged and skipped; they never affect connection state.
use async_trait::async_trait;
use serde_json::Value;

use crate::deps::ClusterConnection;
use crate::error::Error;
use crate::models::cluster::{metadata_key, ClusterMetadata};

#[async_trait]
pub trait MetadataDetector: Send + Sync {
    /// Metadata key this detector produces.
    fn key(&self) -> &'static str;

    /// `Ok(None)` means "nothing detected" and leaves the existing value
    /// for this key untouched.
    async fn detect(
        &self,
        connection: &dyn ClusterConnection,
        api_url: &str,
    ) -> Result<Option<Value>, Error>;
}

/// Ordered set of detectors run during each accessibility+metadata refresh.
pub struct DetectorRegistry {
    detectors: Vec<Box<dyn MetadataDetector>>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self {
            detectors: Vec::new(),
        }
    }

    pub fn register(mut self, detector: Box<dyn MetadataDetector>) -> Self {
        self.detectors.push(detector);
        self
    }

    /// Runs every detector and returns the partial metadata map. Keys
    /// absent from the result must not overwrite existing metadata; the
    /// caller merges accordingly.
    pub async fn detect(
        &self,
        connection: &dyn ClusterConnection,
        api_url: &str,
    ) -> ClusterMetadata {
        let mut detected = ClusterMetadata::new();

        for detector in &self.detectors {
            match detector.detect(connection, api_url).await {
                Ok(Some(value)) => {
                    detected.insert(detector.key().to_string(), value);
                }
                Ok(None) => {}
                Err(error) => {
                    log::warn!("detectors: {} detection failed: {error}", detector.key());
                }
            }
        }

        detected
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::new()
            .register(Box::new(VersionDetector))
            .register(Box::new(DistributionDetector))
            .register(Box::new(LastSeenDetector))
    }
}

/// Reports the endpoint's version string.
pub struct VersionDetector;

#[async_trait]
impl MetadataDetector for VersionDetector {
    fn key(&self) -> &'static str {
        metadata_key::VERSION
    }

    async fn detect(
        &self,
        connection: &dyn ClusterConnection,
        _api_url: &str,
    ) -> Result<Option<Value>, Error> {
        match connection.detect_reachability().await {
            Ok(version) => Ok(Some(Value::String(version.git_version))),
            Err(failure) => {
                log::debug!("detectors: version probe failed: {}", failure.message);
                Ok(None)
            }
        }
    }
}

/// Guesses the Kubernetes distribution from the version string and the
/// API server URL, the same heuristics kubectl users apply by eye.
pub struct DistributionDetector;

impl DistributionDetector {
    fn from_version(version: &str) -> Option<&'static str> {
        if version.contains("gke") {
            Some("gke")
        } else if version.contains("eks") {
            Some("eks")
        } else if version.contains("k3s") {
            Some("k3s")
        } else if version.contains("rke2") {
            Some("rke2")
        } else {
            None
        }
    }

    fn from_api_url(api_url: &str) -> Option<&'static str> {
        if api_url.contains("azmk8s.io") {
            Some("aks")
        } else if api_url.contains("eks.amazonaws.com") {
            Some("eks")
        } else if api_url.contains("127.0.0.1") || api_url.contains("localhost") {
            Some("minikube")
        } else {
            None
        }
    }
}

#[async_trait]
impl MetadataDetector for DistributionDetector {
    fn key(&self) -> &'static str {
        metadata_key::DISTRIBUTION
    }

    async fn detect(
        &self,
        connection: &dyn ClusterConnection,
        api_url: &str,
    ) -> Result<Option<Value>, Error> {
        if let Some(distribution) = Self::from_api_url(api_url) {
            return Ok(Some(Value::String(distribution.to_string())));
        }

        let version = match connection.detect_reachability().await {
            Ok(version) => version.git_version,
            Err(_) => return Ok(None),
        };

        Ok(Self::from_version(&version)
            .map(|distribution| Value::String(distribution.to_string())))
    }
}

/// Stamps the time of the last successful metadata refresh.
pub struct LastSeenDetector;

#[async_trait]
impl MetadataDetector for LastSeenDetector {
    fn key(&self) -> &'static str {
        metadata_key::LAST_SEEN
    }

    async fn detect(
        &self,
        connection: &dyn ClusterConnection,
        _api_url: &str,
    ) -> Result<Option<Value>, Error> {
        if connection.detect_reachability().await.is_err() {
            return Ok(None);
        }
        Ok(Some(Value::String(chrono::Utc::now().to_rfc3339())))
    }
}

/// Merge policy: keys present in `detected` overwrite, keys absent stay.
pub fn merge_metadata(existing: &mut ClusterMetadata, detected: ClusterMetadata) {
    existing.extend(detected);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distribution_heuristics_cover_managed_offerings() {
        assert_eq!(
            DistributionDetector::from_version("v1.30.2-gke.100"),
            Some("gke")
        );
        assert_eq!(
            DistributionDetector::from_version("v1.29.4-eks-036c24b"),
            Some("eks")
        );
        assert_eq!(
            DistributionDetector::from_version("v1.30.1+k3s1"),
            Some("k3s")
        );
        assert_eq!(DistributionDetector::from_version("v1.30.2"), None);
        assert_eq!(
            DistributionDetector::from_api_url("https://mycluster.hcp.eastus.azmk8s.io:443"),
            Some("aks")
        );
        assert_eq!(
            DistributionDetector::from_api_url("https://127.0.0.1:32768"),
            Some("minikube")
        );
    }

    #[test]
    fn merge_keeps_keys_absent_from_the_result() {
        let mut existing = ClusterMetadata::new();
        existing.insert("version".into(), "v1.29.0".into());
        existing.insert("distribution".into(), "k3s".into());

        let mut detected = ClusterMetadata::new();
        detected.insert("version".into(), "v1.30.2".into());

        merge_metadata(&mut existing, detected);
        assert_eq!(existing["version"], serde_json::json!("v1.30.2"));
        assert_eq!(existing["distribution"], serde_json::json!("k3s"));
    }
}
