//! Controller-specific error types.
//!
//! Errors fall into two groups. Configuration errors (`InvalidConfig`,
//! `Template`) cannot be fixed by retrying: they abort the affected state
//! and are surfaced in the ClusterPolicy status until the policy changes.
//! Everything else is transient and simply retried on the next pass.

use cluster_client::ClientError;
use crds::SpecError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the GPU Operator controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error outside the object-store client
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Object-store client error (API failure, version conflict, ...)
    #[error("Cluster client error: {0}")]
    Client(#[from] ClientError),

    /// Invalid ClusterPolicy or operator configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Bundled template is missing something the transform requires
    #[error("Template error: {0}")]
    Template(String),

    /// A ConfigMap referenced by the ClusterPolicy does not exist yet
    #[error("Referenced ConfigMap {0} not found")]
    MissingConfigReference(String),

    /// Cluster facts could not be gathered
    #[error("Cluster facts unavailable: {0}")]
    Facts(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// True when re-running the pass may succeed without a configuration change.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ControllerError::InvalidConfig(_) | ControllerError::Template(_))
    }

    /// True when the object store reported a missing object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ControllerError::Client(e) if e.is_not_found())
    }
}

impl From<SpecError> for ControllerError {
    fn from(err: SpecError) -> Self {
        ControllerError::InvalidConfig(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(!ControllerError::InvalidConfig("bad image".into()).is_retryable());
        assert!(!ControllerError::Template("missing sidecar".into()).is_retryable());
        assert!(ControllerError::MissingConfigReference("plugin-config".into()).is_retryable());
        assert!(ControllerError::Client(ClientError::Conflict("stale".into())).is_retryable());
        assert!(ControllerError::Facts("no os-release".into()).is_retryable());
    }

    #[test]
    fn test_spec_error_is_config_error() {
        let err: ControllerError = crds::MaxUnavailable::parse("150%").unwrap_err().into();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("maxUnavailable"));
    }
}
