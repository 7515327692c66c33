// Turns the outcome of a single reachability probe into a connection
// status plus an optional error message for the broadcast stream.
use serde::{Deserialize, Serialize};

/// Result of classifying one reachability attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ClusterStatus {
    /// Endpoint did not respond at all.
    Offline,
    /// Endpoint responded but rejected the credentials.
    AccessDenied,
    /// Endpoint responded and accepted the credentials.
    AccessGranted,
}

/// Version payload returned by a successful reachability probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReachableVersion {
    pub git_version: String,
}

/// Failure shape of a reachability probe, as reported by the transport.
#[derive(Debug, Clone, Default)]
pub struct ReachabilityFailure {
    pub status_code: Option<u16>,
    pub transport_failed: bool,
    pub timed_out: bool,
    /// Transport's own description of what went wrong.
    pub message: String,
}

impl ReachabilityFailure {
    fn describe(&self) -> String {
        if self.message.is_empty() {
            "Unknown error has occurred".to_string()
        } else {
            self.message.clone()
        }
    }
}

/// Classifies one probe outcome. Never fails: every failure shape maps to
/// a status plus the message the caller must broadcast (error-flagged).
/// A success classifies with no message; the caller merges the reported
/// version into cluster metadata.
pub fn classify(
    outcome: &Result<ReachableVersion, ReachabilityFailure>,
) -> (ClusterStatus, Option<String>) {
    let failure = match outcome {
        Ok(_) => return (ClusterStatus::AccessGranted, None),
        Err(failure) => failure,
    };

    if let Some(code) = failure.status_code {
        if (400..500).contains(&code) {
            return (ClusterStatus::AccessDenied, Some("Invalid credentials".into()));
        }
        return (ClusterStatus::Offline, Some(failure.describe()));
    }

    if failure.transport_failed {
        if failure.timed_out {
            return (ClusterStatus::Offline, Some("Connection timed out".into()));
        }
        return (
            ClusterStatus::AccessDenied,
            Some("Failed to fetch credentials".into()),
        );
    }

    (
        ClusterStatus::Offline,
        Some("Unknown error has occurred".into()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(
        status_code: Option<u16>,
        transport_failed: bool,
        timed_out: bool,
        message: &str,
    ) -> Result<ReachableVersion, ReachabilityFailure> {
        Err(ReachabilityFailure {
            status_code,
            transport_failed,
            timed_out,
            message: message.to_string(),
        })
    }

    #[test]
    fn success_grants_access_without_a_message() {
        let outcome = Ok(ReachableVersion {
            git_version: "v1.30.2".into(),
        });
        assert_eq!(classify(&outcome), (ClusterStatus::AccessGranted, None));
    }

    #[test]
    fn http_401_means_invalid_credentials() {
        let (status, message) = classify(&failure(Some(401), false, false, "unauthorized"));
        assert_eq!(status, ClusterStatus::AccessDenied);
        assert_eq!(message.as_deref(), Some("Invalid credentials"));
    }

    #[test]
    fn http_5xx_is_offline_with_the_transport_description() {
        let (status, message) =
            classify(&failure(Some(503), false, false, "service unavailable"));
        assert_eq!(status, ClusterStatus::Offline);
        assert_eq!(message.as_deref(), Some("service unavailable"));
    }

    #[test]
    fn transport_timeout_is_offline() {
        let (status, message) = classify(&failure(None, true, true, ""));
        assert_eq!(status, ClusterStatus::Offline);
        assert_eq!(message.as_deref(), Some("Connection timed out"));
    }

    #[test]
    fn transport_failure_without_timeout_is_denied() {
        let (status, message) = classify(&failure(None, true, false, "exec plugin failed"));
        assert_eq!(status, ClusterStatus::AccessDenied);
        assert_eq!(message.as_deref(), Some("Failed to fetch credentials"));
    }

    #[test]
    fn any_other_shape_is_an_unknown_offline_error() {
        let (status, message) = classify(&failure(None, false, false, "??"));
        assert_eq!(status, ClusterStatus::Offline);
        assert_eq!(message.as_deref(), Some("Unknown error has occurred"));
    }

    #[test]
    fn statuses_order_offline_lowest() {
        // refresh_connection_status relies on this ordering for `online`.
        assert!(ClusterStatus::AccessDenied > ClusterStatus::Offline);
        assert!(ClusterStatus::AccessGranted > ClusterStatus::Offline);
    }
}
