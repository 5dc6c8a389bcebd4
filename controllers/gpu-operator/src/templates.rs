//! Bundled operand templates.
//!
//! Every state is a multi-document YAML manifest compiled into the binary.
//! The registry is parsed once at startup and never mutated afterwards; the
//! transform pipeline always works on clones.

use crate::error::ControllerError;
use crate::transform::OperandKind;
use cluster_client::{ObjectKind, to_dynamic};
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service, ServiceAccount};
use k8s_openapi::api::node::v1::RuntimeClass;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use kube::api::{DynamicObject, ObjectMeta};
use serde::Deserialize;
use tracing::debug;

/// State name, manifest, and the operand whose enable flag gates the state.
/// States are reconciled in this order.
const STATES: &[(&str, &str, Option<OperandKind>)] = &[
    ("pre-requisites", include_str!("../assets/pre-requisites.yaml"), None),
    ("state-driver", include_str!("../assets/state-driver.yaml"), Some(OperandKind::Driver)),
    (
        "state-container-toolkit",
        include_str!("../assets/state-container-toolkit.yaml"),
        Some(OperandKind::ContainerToolkit),
    ),
    (
        "state-operator-validation",
        include_str!("../assets/state-operator-validation.yaml"),
        Some(OperandKind::OperatorValidator),
    ),
    (
        "state-device-plugin",
        include_str!("../assets/state-device-plugin.yaml"),
        Some(OperandKind::DevicePlugin),
    ),
    ("state-dcgm", include_str!("../assets/state-dcgm.yaml"), Some(OperandKind::Dcgm)),
    (
        "state-dcgm-exporter",
        include_str!("../assets/state-dcgm-exporter.yaml"),
        Some(OperandKind::DcgmExporter),
    ),
    (
        "gpu-feature-discovery",
        include_str!("../assets/gpu-feature-discovery.yaml"),
        Some(OperandKind::GpuFeatureDiscovery),
    ),
    (
        "state-mig-manager",
        include_str!("../assets/state-mig-manager.yaml"),
        Some(OperandKind::MigManager),
    ),
    (
        "state-node-status-exporter",
        include_str!("../assets/state-node-status-exporter.yaml"),
        Some(OperandKind::NodeStatusExporter),
    ),
    (
        "state-vgpu-manager",
        include_str!("../assets/state-vgpu-manager.yaml"),
        Some(OperandKind::VgpuManager),
    ),
    (
        "state-vgpu-device-manager",
        include_str!("../assets/state-vgpu-device-manager.yaml"),
        Some(OperandKind::VgpuDeviceManager),
    ),
    (
        "state-cc-manager",
        include_str!("../assets/state-cc-manager.yaml"),
        Some(OperandKind::CcManager),
    ),
];

/// One object of an operand state.
#[derive(Debug, Clone, PartialEq)]
pub enum OperandObject {
    ServiceAccount(ServiceAccount),
    Role(Role),
    RoleBinding(RoleBinding),
    ClusterRole(ClusterRole),
    ClusterRoleBinding(ClusterRoleBinding),
    ConfigMap(ConfigMap),
    RuntimeClass(RuntimeClass),
    DaemonSet(DaemonSet),
    Service(Service),
}

macro_rules! each_object {
    ($value:expr, $obj:ident => $body:expr) => {
        match $value {
            OperandObject::ServiceAccount($obj) => $body,
            OperandObject::Role($obj) => $body,
            OperandObject::RoleBinding($obj) => $body,
            OperandObject::ClusterRole($obj) => $body,
            OperandObject::ClusterRoleBinding($obj) => $body,
            OperandObject::ConfigMap($obj) => $body,
            OperandObject::RuntimeClass($obj) => $body,
            OperandObject::DaemonSet($obj) => $body,
            OperandObject::Service($obj) => $body,
        }
    };
}

impl OperandObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            OperandObject::ServiceAccount(_) => ObjectKind::ServiceAccount,
            OperandObject::Role(_) => ObjectKind::Role,
            OperandObject::RoleBinding(_) => ObjectKind::RoleBinding,
            OperandObject::ClusterRole(_) => ObjectKind::ClusterRole,
            OperandObject::ClusterRoleBinding(_) => ObjectKind::ClusterRoleBinding,
            OperandObject::ConfigMap(_) => ObjectKind::ConfigMap,
            OperandObject::RuntimeClass(_) => ObjectKind::RuntimeClass,
            OperandObject::DaemonSet(_) => ObjectKind::DaemonSet,
            OperandObject::Service(_) => ObjectKind::Service,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        each_object!(self, obj => &obj.metadata)
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        each_object!(self, obj => &mut obj.metadata)
    }

    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    pub fn to_dynamic(&self) -> Result<DynamicObject, ControllerError> {
        Ok(each_object!(self, obj => to_dynamic(obj))?)
    }

    fn parse(doc: serde_yaml::Value) -> Result<Self, ControllerError> {
        let kind = doc
            .get("kind")
            .and_then(|k| k.as_str())
            .ok_or_else(|| ControllerError::Template("manifest without kind".to_string()))?
            .to_string();

        let object_kind = ObjectKind::from_kind(&kind)
            .ok_or_else(|| ControllerError::Template(format!("unsupported kind {} in manifest", kind)))?;

        let invalid = |e: serde_yaml::Error| ControllerError::Template(format!("invalid {} manifest: {}", kind, e));
        let obj = match object_kind {
            ObjectKind::ServiceAccount => OperandObject::ServiceAccount(serde_yaml::from_value(doc).map_err(invalid)?),
            ObjectKind::Role => OperandObject::Role(serde_yaml::from_value(doc).map_err(invalid)?),
            ObjectKind::RoleBinding => OperandObject::RoleBinding(serde_yaml::from_value(doc).map_err(invalid)?),
            ObjectKind::ClusterRole => OperandObject::ClusterRole(serde_yaml::from_value(doc).map_err(invalid)?),
            ObjectKind::ClusterRoleBinding => {
                OperandObject::ClusterRoleBinding(serde_yaml::from_value(doc).map_err(invalid)?)
            }
            ObjectKind::ConfigMap => OperandObject::ConfigMap(serde_yaml::from_value(doc).map_err(invalid)?),
            ObjectKind::RuntimeClass => OperandObject::RuntimeClass(serde_yaml::from_value(doc).map_err(invalid)?),
            ObjectKind::DaemonSet => OperandObject::DaemonSet(serde_yaml::from_value(doc).map_err(invalid)?),
            ObjectKind::Service => OperandObject::Service(serde_yaml::from_value(doc).map_err(invalid)?),
            other => {
                return Err(ControllerError::Template(format!("{} cannot be part of an operand state", other)));
            }
        };

        if obj.name().is_empty() {
            return Err(ControllerError::Template(format!("{} manifest without metadata.name", kind)));
        }
        Ok(obj)
    }
}

/// Template objects of one state, ordered accounts/roles/bindings, then
/// config, then workloads, then services.
#[derive(Debug, Clone)]
pub struct StateTemplate {
    pub name: &'static str,
    /// Operand gating this state; `None` means always enabled
    pub operand: Option<OperandKind>,
    pub objects: Vec<OperandObject>,
}

impl StateTemplate {
    fn parse(name: &'static str, manifest: &str, operand: Option<OperandKind>) -> Result<Self, ControllerError> {
        let mut objects = Vec::new();
        for document in serde_yaml::Deserializer::from_str(manifest) {
            let value = serde_yaml::Value::deserialize(document)
                .map_err(|e| ControllerError::Template(format!("{}: {}", name, e)))?;
            if value.is_null() {
                continue;
            }
            objects.push(OperandObject::parse(value).map_err(|e| ControllerError::Template(format!("{}: {}", name, e)))?);
        }
        // ObjectKind ordering is the apply order; the sort is stable
        objects.sort_by_key(OperandObject::kind);
        Ok(Self { name, operand, objects })
    }

    pub fn daemonsets(&self) -> impl Iterator<Item = &DaemonSet> {
        self.objects.iter().filter_map(|o| match o {
            OperandObject::DaemonSet(ds) => Some(ds),
            _ => None,
        })
    }
}

/// Immutable set of state templates, in reconciliation order.
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    states: Vec<StateTemplate>,
}

impl TemplateRegistry {
    /// Parses the bundled manifests.
    pub fn load() -> Result<Self, ControllerError> {
        let states = STATES
            .iter()
            .map(|(name, manifest, operand)| StateTemplate::parse(name, manifest, *operand))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(
            "Loaded {} operand states ({} objects)",
            states.len(),
            states.iter().map(|s| s.objects.len()).sum::<usize>()
        );
        Ok(Self { states })
    }

    pub fn states(&self) -> &[StateTemplate] {
        &self.states
    }

    pub fn state(&self, name: &str) -> Option<&StateTemplate> {
        self.states.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_bundled_states_parse() {
        let registry = TemplateRegistry::load().unwrap();
        assert_eq!(registry.states().len(), STATES.len());
        assert_eq!(registry.states()[0].name, "pre-requisites");
        assert_eq!(registry.states()[1].name, "state-driver");

        for state in registry.states() {
            assert!(!state.objects.is_empty(), "{} has no objects", state.name);
        }
    }

    #[test]
    fn test_objects_ordered_rbac_then_workloads_then_services() {
        let registry = TemplateRegistry::load().unwrap();
        let exporter = registry.state("state-dcgm-exporter").unwrap();
        let kinds: Vec<ObjectKind> = exporter.objects.iter().map(OperandObject::kind).collect();
        assert_eq!(
            kinds,
            vec![
                ObjectKind::ServiceAccount,
                ObjectKind::Role,
                ObjectKind::RoleBinding,
                ObjectKind::DaemonSet,
                ObjectKind::Service,
            ]
        );
    }

    #[test]
    fn test_every_daemonset_has_a_transform() {
        let registry = TemplateRegistry::load().unwrap();
        for state in registry.states() {
            for ds in state.daemonsets() {
                let name = ds.metadata.name.as_deref().unwrap();
                let operand = OperandKind::for_daemonset(name).map(|(kind, _)| kind);
                assert_eq!(operand, state.operand, "{} in {}", name, state.name);
            }
        }
    }

    #[test]
    fn test_unsupported_kind_is_template_error() {
        let doc: serde_yaml::Value = serde_yaml::from_str("apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: x\n").unwrap();
        let err = OperandObject::parse(doc).unwrap_err();
        assert!(matches!(err, ControllerError::Template(_)));
        assert!(!err.is_retryable());
    }
}
