//! Operand template transform pipeline.
//!
//! `transform_object` turns one bundled template into the object that is
//! applied for the current ClusterPolicy and cluster facts. DaemonSets run
//! through three steps:
//!
//! 1. settings shared by every operand (`common`)
//! 2. the operand-specific transform, looked up by DaemonSet name
//! 3. the user's env overrides on the operand container, which win over
//!    anything the operator set
//! 4. validation init container wiring (`validation`)
//!
//! Templates are never mutated; every call works on a clone, so the same
//! inputs always produce the same object.

pub mod cc_manager;
pub mod common;
pub mod dcgm;
pub mod device_plugin;
pub mod driver;
pub mod env;
pub mod gfd;
pub mod image;
pub mod mig_manager;
pub mod node_status_exporter;
pub mod pod;
pub mod runtime;
pub mod toolkit;
pub mod validation;
pub mod validator;
pub mod vgpu;

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::facts::ClusterFacts;
use crate::templates::OperandObject;
use crate::variant::Variant;
use crds::{ClusterPolicySpec, HasImageSpec};
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;
use tracing::warn;

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "gpu-operator";

/// Inputs of one transform call.
#[derive(Debug, Clone, Copy)]
pub struct TransformContext<'a> {
    pub spec: &'a ClusterPolicySpec,
    pub facts: &'a ClusterFacts,
    pub config: &'a OperatorConfig,
    /// Controller reference to the ClusterPolicy
    pub owner: Option<&'a OwnerReference>,
    /// Variant being materialized, for variant-bound operands
    pub variant: Option<&'a Variant>,
}

impl<'a> TransformContext<'a> {
    pub fn new(spec: &'a ClusterPolicySpec, facts: &'a ClusterFacts, config: &'a OperatorConfig) -> Self {
        Self {
            spec,
            facts,
            config,
            owner: None,
            variant: None,
        }
    }

    pub fn with_owner(self, owner: Option<&'a OwnerReference>) -> Self {
        Self { owner, ..self }
    }

    pub fn with_variant<'b>(&self, variant: Option<&'b Variant>) -> TransformContext<'b>
    where
        'a: 'b,
    {
        TransformContext {
            spec: self.spec,
            facts: self.facts,
            config: self.config,
            owner: self.owner,
            variant,
        }
    }
}

/// Operand kinds managed by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandKind {
    Driver,
    ContainerToolkit,
    OperatorValidator,
    DevicePlugin,
    Dcgm,
    DcgmExporter,
    GpuFeatureDiscovery,
    MigManager,
    NodeStatusExporter,
    VgpuManager,
    VgpuDeviceManager,
    CcManager,
}

/// Operand-specific DaemonSet transform.
pub type TransformFn = fn(&mut DaemonSet, &TransformContext<'_>) -> Result<(), ControllerError>;

/// DaemonSet name -> operand and its transform.
const DAEMONSET_TRANSFORMS: &[(&str, OperandKind, TransformFn)] = &[
    ("nvidia-driver-daemonset", OperandKind::Driver, driver::transform),
    ("nvidia-container-toolkit-daemonset", OperandKind::ContainerToolkit, toolkit::transform),
    ("nvidia-operator-validator", OperandKind::OperatorValidator, validator::transform),
    ("nvidia-device-plugin-daemonset", OperandKind::DevicePlugin, device_plugin::transform),
    ("nvidia-dcgm", OperandKind::Dcgm, dcgm::transform_dcgm),
    ("nvidia-dcgm-exporter", OperandKind::DcgmExporter, dcgm::transform_exporter),
    ("gpu-feature-discovery", OperandKind::GpuFeatureDiscovery, gfd::transform),
    ("nvidia-mig-manager", OperandKind::MigManager, mig_manager::transform),
    ("nvidia-node-status-exporter", OperandKind::NodeStatusExporter, node_status_exporter::transform),
    ("nvidia-vgpu-manager-daemonset", OperandKind::VgpuManager, vgpu::transform_manager),
    ("nvidia-vgpu-device-manager", OperandKind::VgpuDeviceManager, vgpu::transform_device_manager),
    ("nvidia-cc-manager", OperandKind::CcManager, cc_manager::transform),
];

impl OperandKind {
    pub const ALL: [OperandKind; 12] = [
        OperandKind::Driver,
        OperandKind::ContainerToolkit,
        OperandKind::OperatorValidator,
        OperandKind::DevicePlugin,
        OperandKind::Dcgm,
        OperandKind::DcgmExporter,
        OperandKind::GpuFeatureDiscovery,
        OperandKind::MigManager,
        OperandKind::NodeStatusExporter,
        OperandKind::VgpuManager,
        OperandKind::VgpuDeviceManager,
        OperandKind::CcManager,
    ];

    /// Looks up the operand owning a template DaemonSet.
    pub fn for_daemonset(name: &str) -> Option<(OperandKind, TransformFn)> {
        DAEMONSET_TRANSFORMS
            .iter()
            .find(|(ds, _, _)| *ds == name)
            .map(|(_, kind, transform)| (*kind, *transform))
    }

    /// Suffix of the `nvidia.com/gpu.deploy.<operand>` node label.
    pub fn deploy_label_suffix(self) -> &'static str {
        match self {
            OperandKind::Driver => "driver",
            OperandKind::ContainerToolkit => "container-toolkit",
            OperandKind::OperatorValidator => "operator-validator",
            OperandKind::DevicePlugin => "device-plugin",
            OperandKind::Dcgm => "dcgm",
            OperandKind::DcgmExporter => "dcgm-exporter",
            OperandKind::GpuFeatureDiscovery => "gpu-feature-discovery",
            OperandKind::MigManager => "mig-manager",
            OperandKind::NodeStatusExporter => "node-status-exporter",
            OperandKind::VgpuManager => "vgpu-manager",
            OperandKind::VgpuDeviceManager => "vgpu-device-manager",
            OperandKind::CcManager => "cc-manager",
        }
    }

    pub fn is_enabled(self, spec: &ClusterPolicySpec) -> bool {
        match self {
            OperandKind::Driver => spec.driver.is_enabled(),
            OperandKind::ContainerToolkit => spec.toolkit.is_enabled(),
            OperandKind::OperatorValidator => spec.validator.is_enabled(),
            OperandKind::DevicePlugin => spec.device_plugin.is_enabled(),
            OperandKind::Dcgm => spec.dcgm.is_enabled(),
            OperandKind::DcgmExporter => spec.dcgm_exporter.is_enabled(),
            OperandKind::GpuFeatureDiscovery => spec.gfd.is_enabled(),
            OperandKind::MigManager => spec.mig_manager.is_enabled(),
            OperandKind::NodeStatusExporter => spec.node_status_exporter.is_enabled(),
            OperandKind::VgpuManager => spec.vgpu_manager.is_enabled(),
            OperandKind::VgpuDeviceManager => spec.vgpu_device_manager.is_enabled(),
            OperandKind::CcManager => spec.cc_manager.is_enabled(),
        }
    }

    /// Names of the external ConfigMaps the operand reads.
    pub fn config_references(self, spec: &ClusterPolicySpec) -> Vec<String> {
        let refs = match self {
            OperandKind::Driver => vec![
                spec.driver.kernel_module_config.name(),
                spec.driver.repo_config.name(),
                spec.driver.cert_config.name(),
            ],
            OperandKind::DevicePlugin => vec![spec.device_plugin.config.name()],
            OperandKind::DcgmExporter => vec![spec.dcgm_exporter.config.name()],
            OperandKind::MigManager => vec![spec.mig_manager.config.name(), spec.mig_manager.gpu_clients_config.name()],
            OperandKind::VgpuDeviceManager => vec![spec.vgpu_device_manager.config.name()],
            _ => Vec::new(),
        };
        refs.into_iter().flatten().map(str::to_string).collect()
    }

    /// Sub-spec carrying the operand's image coordinates and overrides.
    pub fn image_spec(self, spec: &ClusterPolicySpec) -> &dyn HasImageSpec {
        match self {
            OperandKind::Driver => &spec.driver,
            OperandKind::ContainerToolkit => &spec.toolkit,
            OperandKind::OperatorValidator => &spec.validator,
            OperandKind::DevicePlugin => &spec.device_plugin,
            OperandKind::Dcgm => &spec.dcgm,
            OperandKind::DcgmExporter => &spec.dcgm_exporter,
            OperandKind::GpuFeatureDiscovery => &spec.gfd,
            OperandKind::MigManager => &spec.mig_manager,
            OperandKind::NodeStatusExporter => &spec.node_status_exporter,
            OperandKind::VgpuManager => &spec.vgpu_manager,
            OperandKind::VgpuDeviceManager => &spec.vgpu_device_manager,
            OperandKind::CcManager => &spec.cc_manager,
        }
    }

    /// Container running the operand itself.
    pub fn main_container(self) -> &'static str {
        match self {
            OperandKind::Driver => driver::DRIVER_CONTAINER,
            OperandKind::ContainerToolkit => toolkit::TOOLKIT_CONTAINER,
            OperandKind::OperatorValidator => validator::VALIDATOR_CONTAINER,
            OperandKind::DevicePlugin => device_plugin::PLUGIN_CONTAINER,
            OperandKind::Dcgm => dcgm::DCGM_CONTAINER,
            OperandKind::DcgmExporter => dcgm::EXPORTER_CONTAINER,
            OperandKind::GpuFeatureDiscovery => gfd::GFD_CONTAINER,
            OperandKind::MigManager => mig_manager::MIG_MANAGER_CONTAINER,
            OperandKind::NodeStatusExporter => node_status_exporter::EXPORTER_CONTAINER,
            OperandKind::VgpuManager => vgpu::MANAGER_CONTAINER,
            OperandKind::VgpuDeviceManager => vgpu::DEVICE_MANAGER_CONTAINER,
            OperandKind::CcManager => cc_manager::CC_MANAGER_CONTAINER,
        }
    }

    /// Operands deployed once per kernel version or OS image revision.
    pub fn supports_variants(self) -> bool {
        matches!(self, OperandKind::Driver)
    }
}

/// Produces the object to apply for one template object.
pub fn transform_object(template: &OperandObject, ctx: &TransformContext<'_>) -> Result<OperandObject, ControllerError> {
    let mut obj = match template {
        OperandObject::DaemonSet(ds) => return transform_daemonset(ds, ctx).map(OperandObject::DaemonSet),
        OperandObject::RuntimeClass(rc) => {
            let mut rc = rc.clone();
            let class = ctx.spec.operator.runtime_class().to_string();
            rc.metadata.name = Some(class.clone());
            rc.handler = class;
            OperandObject::RuntimeClass(rc)
        }
        OperandObject::RoleBinding(rb) => {
            let mut rb = rb.clone();
            for subject in rb.subjects.iter_mut().flatten() {
                subject.namespace = Some(ctx.config.namespace.clone());
            }
            OperandObject::RoleBinding(rb)
        }
        OperandObject::ClusterRoleBinding(crb) => {
            let mut crb = crb.clone();
            for subject in crb.subjects.iter_mut().flatten() {
                subject.namespace = Some(ctx.config.namespace.clone());
            }
            OperandObject::ClusterRoleBinding(crb)
        }
        other => other.clone(),
    };
    let namespaced = obj.kind().is_namespaced();
    finalize_metadata(obj.metadata_mut(), namespaced, ctx);
    Ok(obj)
}

/// Runs the DaemonSet pipeline. Unknown DaemonSets are left as they are.
pub fn transform_daemonset(template: &DaemonSet, ctx: &TransformContext<'_>) -> Result<DaemonSet, ControllerError> {
    let mut ds = template.clone();
    let name = ds.metadata.name.clone().unwrap_or_default();

    match OperandKind::for_daemonset(&name) {
        Some((operand, transform)) => {
            common::apply(&mut ds, operand, ctx)?;
            transform(&mut ds, ctx).map_err(|e| annotate_error(e, &name))?;
            apply_user_env(&mut ds, operand, ctx).map_err(|e| annotate_error(e, &name))?;
            validation::apply(&mut ds, ctx).map_err(|e| annotate_error(e, &name))?;
        }
        None => warn!("No transform registered for DaemonSet {}, applying template unchanged", name),
    }

    finalize_metadata(&mut ds.metadata, true, ctx);
    Ok(ds)
}

/// Re-applies the user's env overrides after the operand transform so a
/// variable the operator also sets keeps the user's value.
fn apply_user_env(ds: &mut DaemonSet, operand: OperandKind, ctx: &TransformContext<'_>) -> Result<(), ControllerError> {
    let overrides = &operand.image_spec(ctx.spec).overrides().env;
    if overrides.is_empty() {
        return Ok(());
    }
    let container = pod::any_container_mut(pod::pod_spec_mut(ds)?, operand.main_container())?;
    env::apply_env_overrides(container, overrides);
    Ok(())
}

fn annotate_error(err: ControllerError, name: &str) -> ControllerError {
    match err {
        ControllerError::InvalidConfig(msg) => ControllerError::InvalidConfig(format!("{}: {}", name, msg)),
        ControllerError::Template(msg) => ControllerError::Template(format!("{}: {}", name, msg)),
        other => other,
    }
}

/// Namespace, management label and owner reference shared by all objects.
fn finalize_metadata(meta: &mut ObjectMeta, namespaced: bool, ctx: &TransformContext<'_>) {
    meta.namespace = namespaced.then(|| ctx.config.namespace.clone());
    meta.labels
        .get_or_insert_with(Default::default)
        .insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
    if let Some(owner) = ctx.owner {
        meta.owner_references = Some(vec![owner.clone()]);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::facts::OsRelease;
    use crds::Runtime;

    pub fn facts(runtime: Runtime) -> ClusterFacts {
        ClusterFacts {
            runtime,
            gpu_nodes_present: true,
            host_os: OsRelease::parse("ID=ubuntu\nVERSION_ID=\"22.04\"\n"),
            ..Default::default()
        }
    }

    /// Operator config with every fallback image set.
    pub fn config() -> OperatorConfig {
        let mut config = OperatorConfig::for_tests("gpu-operator");
        let images = &mut config.images;
        images.driver = Some("nvcr.io/nvidia/driver:550.54.15".to_string());
        images.toolkit = Some("nvcr.io/nvidia/k8s/container-toolkit:v1.15.0".to_string());
        images.device_plugin = Some("nvcr.io/nvidia/k8s-device-plugin:v0.15.0".to_string());
        images.dcgm = Some("nvcr.io/nvidia/cloud-native/dcgm:3.3.5-1".to_string());
        images.dcgm_exporter = Some("nvcr.io/nvidia/k8s/dcgm-exporter:3.3.5-3.4.1".to_string());
        images.gfd = Some("nvcr.io/nvidia/gpu-feature-discovery:v0.15.0".to_string());
        images.mig_manager = Some("nvcr.io/nvidia/cloud-native/k8s-mig-manager:v0.7.0".to_string());
        images.vgpu_manager = Some("registry.example.com/nvidia/vgpu-manager:550.54.16".to_string());
        images.vgpu_device_manager = Some("nvcr.io/nvidia/cloud-native/vgpu-device-manager:v0.2.6".to_string());
        images.cc_manager = Some("nvcr.io/nvidia/cloud-native/k8s-cc-manager:v0.1.1".to_string());
        images.validator = Some("nvcr.io/nvidia/cloud-native/gpu-operator-validator:v24.3.0".to_string());
        images.gds = Some("nvcr.io/nvidia/cloud-native/nvidia-fs:2.17.5".to_string());
        images.driver_toolkit = Some("quay.io/openshift-release-dev/driver-toolkit".to_string());
        config
    }

    pub fn template(state: &str) -> DaemonSet {
        let registry = crate::templates::TemplateRegistry::load().unwrap();
        registry.state(state).unwrap().daemonsets().next().unwrap().clone()
    }
}
