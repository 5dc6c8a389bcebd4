//! Object kinds the operator reads and writes.

use k8s_openapi::api::apps::v1::{ControllerRevision, DaemonSet};
use k8s_openapi::api::core::v1::{ConfigMap, Node, Pod, Service, ServiceAccount};
use k8s_openapi::api::node::v1::RuntimeClass;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use kube::discovery::ApiResource;
use std::fmt;

/// Kinds known to the client, each mapped to its API resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    ServiceAccount,
    Role,
    RoleBinding,
    ClusterRole,
    ClusterRoleBinding,
    ConfigMap,
    RuntimeClass,
    DaemonSet,
    Service,
    ControllerRevision,
    Node,
    Pod,
}

impl ObjectKind {
    /// Kind name as it appears in manifests.
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::ServiceAccount => "ServiceAccount",
            ObjectKind::Role => "Role",
            ObjectKind::RoleBinding => "RoleBinding",
            ObjectKind::ClusterRole => "ClusterRole",
            ObjectKind::ClusterRoleBinding => "ClusterRoleBinding",
            ObjectKind::ConfigMap => "ConfigMap",
            ObjectKind::RuntimeClass => "RuntimeClass",
            ObjectKind::DaemonSet => "DaemonSet",
            ObjectKind::Service => "Service",
            ObjectKind::ControllerRevision => "ControllerRevision",
            ObjectKind::Node => "Node",
            ObjectKind::Pod => "Pod",
        }
    }

    /// Parses a manifest `kind` field.
    pub fn from_kind(kind: &str) -> Option<Self> {
        let all = [
            ObjectKind::ServiceAccount,
            ObjectKind::Role,
            ObjectKind::RoleBinding,
            ObjectKind::ClusterRole,
            ObjectKind::ClusterRoleBinding,
            ObjectKind::ConfigMap,
            ObjectKind::RuntimeClass,
            ObjectKind::DaemonSet,
            ObjectKind::Service,
            ObjectKind::ControllerRevision,
            ObjectKind::Node,
            ObjectKind::Pod,
        ];
        all.into_iter().find(|k| k.as_str() == kind)
    }

    /// Cluster-scoped kinds ignore the namespace argument.
    pub fn is_namespaced(self) -> bool {
        !matches!(
            self,
            ObjectKind::ClusterRole | ObjectKind::ClusterRoleBinding | ObjectKind::RuntimeClass | ObjectKind::Node
        )
    }

    pub fn api_resource(self) -> ApiResource {
        match self {
            ObjectKind::ServiceAccount => ApiResource::erase::<ServiceAccount>(&()),
            ObjectKind::Role => ApiResource::erase::<Role>(&()),
            ObjectKind::RoleBinding => ApiResource::erase::<RoleBinding>(&()),
            ObjectKind::ClusterRole => ApiResource::erase::<ClusterRole>(&()),
            ObjectKind::ClusterRoleBinding => ApiResource::erase::<ClusterRoleBinding>(&()),
            ObjectKind::ConfigMap => ApiResource::erase::<ConfigMap>(&()),
            ObjectKind::RuntimeClass => ApiResource::erase::<RuntimeClass>(&()),
            ObjectKind::DaemonSet => ApiResource::erase::<DaemonSet>(&()),
            ObjectKind::Service => ApiResource::erase::<Service>(&()),
            ObjectKind::ControllerRevision => ApiResource::erase::<ControllerRevision>(&()),
            ObjectKind::Node => ApiResource::erase::<Node>(&()),
            ObjectKind::Pod => ApiResource::erase::<Pod>(&()),
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
