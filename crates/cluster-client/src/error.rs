//! Cluster client errors

use thiserror::Error;

/// Errors that can occur when talking to the object store
#[derive(Debug, Error)]
pub enum ClientError {
    /// Object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Optimistic-concurrency check failed (stale resourceVersion) or the
    /// object already exists on create
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Any other Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[source] kube::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Object is missing data the request needs (e.g. a name)
    #[error("Invalid object: {0}")]
    InvalidObject(String),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ClientError::Conflict(_))
    }
}

impl From<kube::Error> for ClientError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(resp) if resp.code == 404 => ClientError::NotFound(resp.message.clone()),
            kube::Error::Api(resp) if resp.code == 409 => ClientError::Conflict(resp.message.clone()),
            _ => ClientError::Kube(err),
        }
    }
}
