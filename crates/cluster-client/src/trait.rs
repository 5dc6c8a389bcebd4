//! ClusterClient trait for mocking
//!
//! This trait abstracts the object store so the reconciler can run against
//! the real API server or an in-memory mock in unit tests.

use crate::error::ClientError;
use crate::kind::ObjectKind;
use crate::selector::Selector;
use async_trait::async_trait;
use kube::api::DynamicObject;

/// Trait for object-store operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
/// `namespace` is ignored for cluster-scoped kinds.
#[async_trait]
pub trait ClusterClientTrait: Send + Sync {
    /// Fetch one object. A missing object is `ClientError::NotFound`.
    async fn get(&self, kind: ObjectKind, namespace: Option<&str>, name: &str) -> Result<DynamicObject, ClientError>;

    /// List objects matching the selector. `namespace: None` lists across all namespaces.
    async fn list(&self, kind: ObjectKind, namespace: Option<&str>, selector: &Selector) -> Result<Vec<DynamicObject>, ClientError>;

    /// Create a new object.
    async fn create(&self, kind: ObjectKind, obj: &DynamicObject) -> Result<DynamicObject, ClientError>;

    /// Replace an existing object. Fails with `ClientError::Conflict` when the
    /// object's `resourceVersion` is stale.
    async fn update(&self, kind: ObjectKind, obj: &DynamicObject) -> Result<DynamicObject, ClientError>;

    /// Delete an object. A missing object is `ClientError::NotFound`.
    async fn delete(&self, kind: ObjectKind, namespace: Option<&str>, name: &str) -> Result<(), ClientError>;
}
