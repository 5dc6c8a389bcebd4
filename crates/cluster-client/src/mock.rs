//! Mock ClusterClient for unit testing
//!
//! Stores objects in memory and mimics the API server semantics the
//! reconciler depends on: `resourceVersion` bumps on every write, stale
//! updates are rejected with `Conflict`, `status` is preserved across
//! replaces, and missing objects are `NotFound`. Every call is journaled so
//! tests can assert which writes happened.

use crate::client_trait::ClusterClientTrait;
use crate::convert::to_dynamic;
use crate::error::ClientError;
use crate::kind::ObjectKind;
use crate::selector::Selector;
use async_trait::async_trait;
use kube::api::DynamicObject;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

type ObjectKey = (ObjectKind, String, String);

/// A journaled client call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCall {
    Get(ObjectKind, String),
    List(ObjectKind),
    Create(ObjectKind, String),
    Update(ObjectKind, String),
    Delete(ObjectKind, String),
}

/// Mock ClusterClient for testing
#[derive(Clone, Default)]
pub struct MockClusterClient {
    objects: Arc<Mutex<BTreeMap<ObjectKey, DynamicObject>>>,
    calls: Arc<Mutex<Vec<ClientCall>>>,
    // Names whose next update fails with a version conflict
    conflict_on_update: Arc<Mutex<HashSet<String>>>,
    // Kinds whose writes fail with an API error
    failing_kinds: Arc<Mutex<HashSet<ObjectKind>>>,
    next_version: Arc<Mutex<u64>>,
}

impl std::fmt::Debug for MockClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockClusterClient")
            .field("objects", &self.objects.lock().unwrap().len())
            .finish_non_exhaustive()
    }
}

fn key(kind: ObjectKind, namespace: Option<&str>, name: &str) -> ObjectKey {
    let ns = if kind.is_namespaced() { namespace.unwrap_or_default() } else { "" };
    (kind, ns.to_string(), name.to_string())
}

fn object_key(kind: ObjectKind, obj: &DynamicObject) -> Result<ObjectKey, ClientError> {
    let name = obj
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| ClientError::InvalidObject(format!("{} without metadata.name", kind)))?;
    Ok(key(kind, obj.metadata.namespace.as_deref(), name))
}

impl MockClusterClient {
    /// Create a new, empty mock client
    pub fn new() -> Self {
        Self::default()
    }

    fn bump_version(&self) -> String {
        let mut version = self.next_version.lock().unwrap();
        *version += 1;
        version.to_string()
    }

    fn record(&self, call: ClientCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn check_failing(&self, kind: ObjectKind) -> Result<(), ClientError> {
        if self.failing_kinds.lock().unwrap().contains(&kind) {
            return Err(ClientError::InvalidObject(format!("injected failure for {}", kind)));
        }
        Ok(())
    }

    /// Insert or overwrite a typed object, including its status (for test setup)
    pub fn put<K: Serialize>(&self, kind: ObjectKind, obj: &K) {
        let mut dynamic = to_dynamic(obj).unwrap();
        dynamic.metadata.resource_version = Some(self.bump_version());
        if dynamic.metadata.generation.is_none() {
            dynamic.metadata.generation = Some(1);
        }
        let key = object_key(kind, &dynamic).unwrap();
        self.objects.lock().unwrap().insert(key, dynamic);
    }

    /// Overwrite the `status` of a stored object (for test setup)
    pub fn set_status(&self, kind: ObjectKind, namespace: Option<&str>, name: &str, status: serde_json::Value) {
        let mut objects = self.objects.lock().unwrap();
        if let Some(obj) = objects.get_mut(&key(kind, namespace, name)) {
            obj.data["status"] = status;
        }
    }

    /// Remove an object without journaling (simulates an external delete)
    pub fn remove(&self, kind: ObjectKind, namespace: Option<&str>, name: &str) {
        self.objects.lock().unwrap().remove(&key(kind, namespace, name));
    }

    /// Stored object, if any
    pub fn object(&self, kind: ObjectKind, namespace: Option<&str>, name: &str) -> Option<DynamicObject> {
        self.objects.lock().unwrap().get(&key(kind, namespace, name)).cloned()
    }

    /// Names of all stored objects of a kind
    pub fn names(&self, kind: ObjectKind) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(k, _, _)| *k == kind)
            .map(|(_, _, name)| name.clone())
            .collect()
    }

    /// Make the next update of `name` fail with a version conflict
    pub fn conflict_next_update(&self, name: &str) {
        self.conflict_on_update.lock().unwrap().insert(name.to_string());
    }

    /// Make every create/update/delete of `kind` fail
    pub fn fail_writes(&self, kind: ObjectKind) {
        self.failing_kinds.lock().unwrap().insert(kind);
    }

    /// All journaled calls
    pub fn calls(&self) -> Vec<ClientCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Journaled writes (create/update/delete) only
    pub fn writes(&self) -> Vec<ClientCall> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, ClientCall::Get(..) | ClientCall::List(..)))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl ClusterClientTrait for MockClusterClient {
    async fn get(&self, kind: ObjectKind, namespace: Option<&str>, name: &str) -> Result<DynamicObject, ClientError> {
        self.record(ClientCall::Get(kind, name.to_string()));
        self.object(kind, namespace, name)
            .ok_or_else(|| ClientError::NotFound(format!("{} {} not found", kind, name)))
    }

    async fn list(&self, kind: ObjectKind, namespace: Option<&str>, selector: &Selector) -> Result<Vec<DynamicObject>, ClientError> {
        self.record(ClientCall::List(kind));
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && (namespace.is_none() || !kind.is_namespaced() || Some(ns.as_str()) == namespace))
            .map(|(_, obj)| obj)
            .filter(|obj| {
                let labels = obj.metadata.labels.clone().unwrap_or_default();
                selector.matches_labels(&labels)
                    && selector.matches_fields(|field| match field {
                        "metadata.name" => obj.metadata.name.as_deref(),
                        "metadata.namespace" => obj.metadata.namespace.as_deref(),
                        "spec.nodeName" => obj.data.get("spec").and_then(|s| s.get("nodeName")).and_then(|v| v.as_str()),
                        _ => None,
                    })
            })
            .cloned()
            .collect())
    }

    async fn create(&self, kind: ObjectKind, obj: &DynamicObject) -> Result<DynamicObject, ClientError> {
        let key = object_key(kind, obj)?;
        self.record(ClientCall::Create(kind, key.2.clone()));
        self.check_failing(kind)?;

        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&key) {
            return Err(ClientError::Conflict(format!("{} {} already exists", kind, key.2)));
        }
        let mut stored = obj.clone();
        stored.metadata.resource_version = Some(self.bump_version());
        stored.metadata.generation = Some(1);
        objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn update(&self, kind: ObjectKind, obj: &DynamicObject) -> Result<DynamicObject, ClientError> {
        let key = object_key(kind, obj)?;
        self.record(ClientCall::Update(kind, key.2.clone()));
        self.check_failing(kind)?;

        if self.conflict_on_update.lock().unwrap().remove(&key.2) {
            return Err(ClientError::Conflict(format!("{} {} has been modified", kind, key.2)));
        }

        let mut objects = self.objects.lock().unwrap();
        let current = objects
            .get(&key)
            .ok_or_else(|| ClientError::NotFound(format!("{} {} not found", kind, key.2)))?;
        if obj.metadata.resource_version.is_some() && obj.metadata.resource_version != current.metadata.resource_version {
            return Err(ClientError::Conflict(format!("{} {} has been modified", kind, key.2)));
        }

        let mut stored = obj.clone();
        // Status is a subresource: a replace never changes it
        match current.data.get("status") {
            Some(status) => stored.data["status"] = status.clone(),
            None => {
                if let Some(data) = stored.data.as_object_mut() {
                    data.remove("status");
                }
            }
        }
        stored.metadata.resource_version = Some(self.bump_version());
        stored.metadata.generation = Some(current.metadata.generation.unwrap_or(1) + 1);
        objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, kind: ObjectKind, namespace: Option<&str>, name: &str) -> Result<(), ClientError> {
        self.record(ClientCall::Delete(kind, name.to_string()));
        self.check_failing(kind)?;
        self.objects
            .lock()
            .unwrap()
            .remove(&key(kind, namespace, name))
            .map(|_| ())
            .ok_or_else(|| ClientError::NotFound(format!("{} {} not found", kind, name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;

    fn config_map(name: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("gpu-operator".to_string()),
                labels: Some([("app".to_string(), name.to_string())].into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_then_stale_update_conflicts() {
        let client = MockClusterClient::new();
        let obj = to_dynamic(&config_map("plugin-config")).unwrap();

        let created = client.create(ObjectKind::ConfigMap, &obj).await.unwrap();
        assert!(created.metadata.resource_version.is_some());

        let updated = client.update(ObjectKind::ConfigMap, &created).await.unwrap();
        assert_ne!(updated.metadata.resource_version, created.metadata.resource_version);

        // created still carries the old resourceVersion
        let err = client.update(ObjectKind::ConfigMap, &created).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let client = MockClusterClient::new();
        let err = client
            .delete(ObjectKind::ConfigMap, Some("gpu-operator"), "absent")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_filters_by_label() {
        let client = MockClusterClient::new();
        client.put(ObjectKind::ConfigMap, &config_map("a"));
        client.put(ObjectKind::ConfigMap, &config_map("b"));

        let found = client
            .list(ObjectKind::ConfigMap, Some("gpu-operator"), &Selector::labels("app=b"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].metadata.name.as_deref(), Some("b"));
    }
}
