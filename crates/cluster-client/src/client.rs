//! Kubernetes-backed cluster client
//!
//! Implements `ClusterClientTrait` over `kube::Api<DynamicObject>`.

use crate::client_trait::ClusterClientTrait;
use crate::error::ClientError;
use crate::kind::ObjectKind;
use crate::selector::Selector;
use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, PostParams};
use kube::{Client, ResourceExt};
use tracing::debug;

/// Cluster client talking to the API server
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl std::fmt::Debug for KubeClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterClient").finish_non_exhaustive()
    }
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, kind: ObjectKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = kind.api_resource();
        match namespace {
            Some(ns) if kind.is_namespaced() => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        }
    }

    fn object_name(kind: ObjectKind, obj: &DynamicObject) -> Result<String, ClientError> {
        obj.metadata
            .name
            .clone()
            .ok_or_else(|| ClientError::InvalidObject(format!("{} without metadata.name", kind)))
    }
}

#[async_trait]
impl ClusterClientTrait for KubeClusterClient {
    async fn get(&self, kind: ObjectKind, namespace: Option<&str>, name: &str) -> Result<DynamicObject, ClientError> {
        debug!("GET {} {}/{}", kind, namespace.unwrap_or(""), name);
        Ok(self.api(kind, namespace).get(name).await?)
    }

    async fn list(&self, kind: ObjectKind, namespace: Option<&str>, selector: &Selector) -> Result<Vec<DynamicObject>, ClientError> {
        debug!("LIST {} in {} ({:?})", kind, namespace.unwrap_or("<all>"), selector);
        let list = self.api(kind, namespace).list(&selector.to_list_params()).await?;
        Ok(list.items)
    }

    async fn create(&self, kind: ObjectKind, obj: &DynamicObject) -> Result<DynamicObject, ClientError> {
        let name = Self::object_name(kind, obj)?;
        debug!("CREATE {} {}/{}", kind, obj.namespace().unwrap_or_default(), name);
        Ok(self
            .api(kind, obj.metadata.namespace.as_deref())
            .create(&PostParams::default(), obj)
            .await?)
    }

    async fn update(&self, kind: ObjectKind, obj: &DynamicObject) -> Result<DynamicObject, ClientError> {
        let name = Self::object_name(kind, obj)?;
        debug!(
            "UPDATE {} {}/{} (resourceVersion {:?})",
            kind,
            obj.namespace().unwrap_or_default(),
            name,
            obj.metadata.resource_version
        );
        // replace() carries metadata.resourceVersion, so a stale object is rejected with 409
        Ok(self
            .api(kind, obj.metadata.namespace.as_deref())
            .replace(&name, &PostParams::default(), obj)
            .await?)
    }

    async fn delete(&self, kind: ObjectKind, namespace: Option<&str>, name: &str) -> Result<(), ClientError> {
        debug!("DELETE {} {}/{}", kind, namespace.unwrap_or(""), name);
        self.api(kind, namespace).delete(name, &DeleteParams::background()).await?;
        Ok(())
    }
}
