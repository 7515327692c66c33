// kube-rs backed implementation of the cluster connection contract. All
// probes go through the proxy kubeconfig, so the local proxy session is
// the only holder of real credentials.
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec,
    SelfSubjectRulesReview, SelfSubjectRulesReviewSpec,
};
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::{Discovery, Scope};
use serde::Deserialize;

use crate::deps::{AccessReview, ClusterConnection, ConnectionFactory, ListPermission};
use crate::error::{Error, NamespaceListError};
use crate::kubeconfig::{context_namespace, resolve_server_url};
use crate::models::rbac::ApiResource;
use crate::status::{ReachabilityFailure, ReachableVersion};

/// Default per-probe timeout. Surfaced to the classifier as the
/// `timed_out` flag; the state machine adds no timeout layer of its own.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct KubeConnectionFactory {
    probe_timeout: Duration,
}

impl KubeConnectionFactory {
    pub fn new() -> Self {
        Self {
            probe_timeout: PROBE_TIMEOUT,
        }
    }

    pub fn with_probe_timeout(probe_timeout: Duration) -> Self {
        Self { probe_timeout }
    }
}

impl Default for KubeConnectionFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionFactory for KubeConnectionFactory {
    async fn connect(
        &self,
        kubeconfig_path: &Path,
        context: &str,
    ) -> Result<Arc<dyn ClusterConnection>, Error> {
        let kubeconfig = Kubeconfig::read_from(kubeconfig_path)
            .map_err(|e| Error::kubeconfig(format!("{}: {e}", kubeconfig_path.display())))?;
        let server_url = resolve_server_url(&kubeconfig, context)?;
        let namespace = context_namespace(&kubeconfig, context);

        let options = KubeConfigOptions {
            context: Some(context.to_string()),
            ..Default::default()
        };
        let config = kube::Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .map_err(|e| Error::kubeconfig(e.to_string()))?;
        let client = kube::Client::try_from(config)?;

        // Self-signed certs are the norm for local proxies and dev
        // clusters; the proxy kubeconfig carries no CA bundle.
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(self.probe_timeout)
            .build()?;

        Ok(Arc::new(KubeClusterConnection {
            client,
            http,
            server_url,
            namespace,
        }))
    }
}

/// Response body of `GET /version`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionInfo {
    git_version: String,
}

pub struct KubeClusterConnection {
    client: kube::Client,
    http: reqwest::Client,
    server_url: String,
    namespace: Option<String>,
}

#[async_trait]
impl ClusterConnection for KubeClusterConnection {
    async fn detect_reachability(&self) -> Result<ReachableVersion, ReachabilityFailure> {
        let url = format!("{}/version", self.server_url.trim_end_matches('/'));

        let response = match self.http.get(&url).send().await {
            Ok(response) => response,
            Err(error) => {
                return Err(ReachabilityFailure {
                    status_code: error.status().map(|status| status.as_u16()),
                    transport_failed: true,
                    timed_out: error.is_timeout(),
                    message: error.to_string(),
                });
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(ReachabilityFailure {
                status_code: Some(status.as_u16()),
                transport_failed: false,
                timed_out: false,
                message: format!("Request failed with status code {}", status.as_u16()),
            });
        }

        match response.json::<VersionInfo>().await {
            Ok(version) => Ok(ReachableVersion {
                git_version: version.git_version,
            }),
            Err(error) => Err(ReachabilityFailure {
                status_code: None,
                transport_failed: false,
                timed_out: false,
                message: format!("Unexpected version payload: {error}"),
            }),
        }
    }

    async fn list_permission(&self, namespace: &str) -> Result<ListPermission, Error> {
        let review = SelfSubjectRulesReview {
            metadata: Default::default(),
            spec: SelfSubjectRulesReviewSpec {
                namespace: Some(namespace.to_string()),
            },
            status: None,
        };

        let api = Api::<SelfSubjectRulesReview>::all(self.client.clone());
        let created = api.create(&PostParams::default(), &review).await?;
        let status = created
            .status
            .ok_or_else(|| Error::probe("rules review returned no status"))?;

        let mut pairs: HashSet<(String, String)> = HashSet::new();
        for rule in status.resource_rules {
            let can_list = rule
                .verbs
                .iter()
                .any(|verb| verb == "list" || verb == "*");
            if !can_list {
                continue;
            }

            let groups = rule.api_groups.unwrap_or_else(|| vec![String::new()]);
            let resources = rule.resources.unwrap_or_default();
            for group in &groups {
                for resource in &resources {
                    if group == "*" && resource == "*" {
                        return Ok(ListPermission::All);
                    }
                    pairs.insert((group.clone(), resource.clone()));
                }
            }
        }

        Ok(ListPermission::Some(pairs))
    }

    async fn can_i(&self, review: &AccessReview) -> Result<bool, Error> {
        let subject_review = SelfSubjectAccessReview {
            metadata: Default::default(),
            spec: SelfSubjectAccessReviewSpec {
                resource_attributes: Some(ResourceAttributes {
                    verb: Some(review.verb.to_string()),
                    resource: Some(review.resource.to_string()),
                    namespace: review.namespace.map(str::to_string),
                    ..Default::default()
                }),
                ..Default::default()
            },
            status: None,
        };

        let api = Api::<SelfSubjectAccessReview>::all(self.client.clone());
        let created = api.create(&PostParams::default(), &subject_review).await?;
        Ok(created.status.map(|status| status.allowed).unwrap_or(false))
    }

    async fn list_namespaces(&self) -> Result<Vec<String>, NamespaceListError> {
        let api = Api::<Namespace>::all(self.client.clone());
        match api.list(&ListParams::default()).await {
            Ok(list) => Ok(list
                .items
                .into_iter()
                .filter_map(|namespace| namespace.metadata.name)
                .collect()),
            Err(kube::Error::Api(response)) if response.code == 403 => {
                Err(NamespaceListError::Forbidden)
            }
            Err(error) => Err(NamespaceListError::Other(error.into())),
        }
    }

    async fn list_api_resources(&self) -> Result<Vec<ApiResource>, Error> {
        let discovery = Discovery::new(self.client.clone()).run().await?;

        let mut resources = Vec::new();
        for group in discovery.groups() {
            for (resource, capabilities) in group.recommended_resources() {
                resources.push(ApiResource::new(
                    &resource.group,
                    &resource.kind,
                    &resource.plural,
                    matches!(capabilities.scope, Scope::Namespaced),
                ));
            }
        }
        Ok(resources)
    }

    fn context_namespace(&self) -> Option<String> {
        self.namespace.clone()
    }
}
