//! Error types for kubelink operations.

use thiserror::Error;

/// Main error type. Connectivity failures are deliberately NOT here —
/// they are classified data (see [`crate::status`]) and never propagate
/// past the activation boundary.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Invalid cluster model shape
    #[error("config error: {0}")]
    Config(String),

    /// Kubeconfig could not be read, parsed or resolved
    #[error("kubeconfig error: {0}")]
    Kubeconfig(String),

    /// Proxy kubeconfig lifecycle error
    #[error("proxy error: {0}")]
    Proxy(String),

    /// Local proxy session error
    #[error("session error: {0}")]
    Session(String),

    /// Local tool provisioning error
    #[error("tool error: {0}")]
    Tool(String),

    /// Authorization probe returned an unusable response
    #[error("probe error: {0}")]
    Probe(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn kubeconfig(msg: impl Into<String>) -> Self {
        Self::Kubeconfig(msg.into())
    }

    pub fn proxy(msg: impl Into<String>) -> Self {
        Self::Proxy(msg.into())
    }

    pub fn session(msg: impl Into<String>) -> Self {
        Self::Session(msg.into())
    }

    pub fn tool(msg: impl Into<String>) -> Self {
        Self::Tool(msg.into())
    }

    pub fn probe(msg: impl Into<String>) -> Self {
        Self::Probe(msg.into())
    }
}

/// Namespace listing failure. The forbidden case is distinguished because
/// it drives a dedicated one-time notification to observers.
#[derive(Debug, Error)]
pub enum NamespaceListError {
    #[error("namespace listing forbidden")]
    Forbidden,

    #[error(transparent)]
    Other(#[from] Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_carry_their_message() {
        let err = Error::config("contextName must not be empty");
        assert!(err.to_string().contains("config error"));
        assert!(err.to_string().contains("contextName"));
    }

    #[test]
    fn namespace_forbidden_is_distinguishable() {
        let err = NamespaceListError::Forbidden;
        assert!(matches!(err, NamespaceListError::Forbidden));

        let err: NamespaceListError = Error::kubeconfig("missing file").into();
        assert!(matches!(err, NamespaceListError::Other(_)));
    }
}
