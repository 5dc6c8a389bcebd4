//! Per-operand sub-specs of the ClusterPolicy.
//!
//! Every operand shares the same image coordinates and workload overrides,
//! flattened into its own sub-spec. The `HasImageSpec` trait exposes those
//! shared pieces so the transform pipeline can treat all operands uniformly.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Errors raised while interpreting ClusterPolicy fields.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpecError {
    /// A numeric or percentage field could not be parsed
    #[error("invalid value {value:?} for {field}: {reason}")]
    InvalidValue {
        field: &'static str,
        value: String,
        reason: String,
    },
}

/// Image coordinates of an operand container.
///
/// Either `repository` + `image` + `version` (tag or `sha256:` digest), or a
/// fully qualified `image` on its own.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    /// Image registry and path (e.g. "nvcr.io/nvidia")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    /// Image name, or a full image path when repository and version are unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Image tag, or a `sha256:` digest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Image pull policy (Always, IfNotPresent, Never)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    /// Names of image pull secrets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<String>,
}

/// Resource requests and limits as quantity strings (e.g. "500m", "1Gi").
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
}

/// A single environment variable override.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub struct EnvVarSpec {
    pub name: String,

    #[serde(default)]
    pub value: String,
}

impl EnvVarSpec {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Container-level overrides applied on top of the bundled template.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadOverrides {
    /// Resource requests/limits. Absent means "keep the template default".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceSpec>,

    /// Arguments replacing the template's default argument list
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Extra environment variables, upserted by name
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVarSpec>,
}

/// Reference to an external ConfigMap holding operand configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapRef {
    /// Name of the ConfigMap in the operator namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Default configuration entry to select inside the ConfigMap
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl ConfigMapRef {
    /// Configured ConfigMap name, ignoring empty strings.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref().filter(|n| !n.is_empty())
    }
}

/// Capability shared by every operand sub-spec: image coordinates plus
/// container overrides.
pub trait HasImageSpec {
    fn image_spec(&self) -> &ImageSpec;

    fn overrides(&self) -> &WorkloadOverrides;

    fn image_pull_policy(&self) -> Option<&str> {
        self.image_spec()
            .image_pull_policy
            .as_deref()
            .filter(|p| !p.is_empty())
    }

    fn image_pull_secrets(&self) -> &[String] {
        &self.image_spec().image_pull_secrets
    }
}

/// Implements `HasImageSpec` and `is_enabled` for sub-specs that flatten
/// `image` and `overrides` and carry an `enabled` toggle.
macro_rules! operand_spec {
    ($($spec:ty => $enabled_by_default:expr),+ $(,)?) => {
        $(
            impl HasImageSpec for $spec {
                fn image_spec(&self) -> &ImageSpec {
                    &self.image
                }

                fn overrides(&self) -> &WorkloadOverrides {
                    &self.overrides
                }
            }

            impl $spec {
                /// Whether the operand should be deployed.
                pub fn is_enabled(&self) -> bool {
                    self.enabled.unwrap_or($enabled_by_default)
                }
            }
        )+
    };
}

operand_spec! {
    DriverSpec => true,
    GdsSpec => false,
    ToolkitSpec => true,
    DevicePluginSpec => true,
    DcgmSpec => true,
    DcgmExporterSpec => true,
    GpuFeatureDiscoverySpec => true,
    MigManagerSpec => true,
    NodeStatusExporterSpec => false,
    VgpuManagerSpec => false,
    VgpuDeviceManagerSpec => false,
    CcManagerSpec => false,
    ValidatorSpec => true,
}

/// Container runtime installed on the GPU nodes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    Docker,
    Crio,
    #[default]
    Containerd,
}

impl Runtime {
    pub fn as_str(self) -> &'static str {
        match self {
            Runtime::Docker => "docker",
            Runtime::Crio => "crio",
            Runtime::Containerd => "containerd",
        }
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OperatorSpec {
    /// Runtime assumed when no GPU node reports one
    #[serde(default)]
    pub default_runtime: Runtime,

    /// RuntimeClass name used for GPU workloads (defaults to "nvidia")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_class: Option<String>,
}

pub const DEFAULT_RUNTIME_CLASS: &str = "nvidia";

impl OperatorSpec {
    pub fn runtime_class(&self) -> &str {
        self.runtime_class
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_RUNTIME_CLASS)
    }
}

/// GPU driver container.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DriverSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Deploy one precompiled driver DaemonSet per running kernel version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_precompiled: Option<bool>,

    /// On OpenShift, build the driver inside the Driver Toolkit image matched
    /// to each RHCOS revision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_openshift_driver_toolkit: Option<bool>,

    /// Driver Toolkit image path (OpenShift only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_toolkit_image: Option<String>,

    #[serde(flatten)]
    pub image: ImageSpec,

    #[serde(flatten)]
    pub overrides: WorkloadOverrides,

    #[serde(default)]
    pub rdma: RdmaSpec,

    #[serde(default)]
    pub gds: GdsSpec,

    /// Kernel module parameters
    #[serde(default)]
    pub kernel_module_config: ConfigMapRef,

    /// Custom package repository configuration
    #[serde(default)]
    pub repo_config: ConfigMapRef,

    /// Custom CA certificates
    #[serde(default)]
    pub cert_config: ConfigMapRef,
}

impl DriverSpec {
    pub fn use_precompiled(&self) -> bool {
        self.use_precompiled.unwrap_or(false)
    }

    pub fn use_openshift_driver_toolkit(&self) -> bool {
        self.use_openshift_driver_toolkit.unwrap_or(true)
    }
}

/// GPUDirect RDMA (peer memory) support.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RdmaSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// MOFED drivers are installed on the host rather than by a MOFED operand
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_host_mofed: Option<bool>,
}

impl RdmaSpec {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(false)
    }

    pub fn use_host_mofed(&self) -> bool {
        self.use_host_mofed.unwrap_or(false)
    }
}

/// GPUDirect Storage (nvidia-fs) support.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GdsSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(flatten)]
    pub image: ImageSpec,

    #[serde(flatten)]
    pub overrides: WorkloadOverrides,
}

/// NVIDIA container toolkit.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ToolkitSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(flatten)]
    pub image: ImageSpec,

    #[serde(flatten)]
    pub overrides: WorkloadOverrides,

    /// Host directory the toolkit is installed into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_dir: Option<String>,
}

pub const DEFAULT_TOOLKIT_INSTALL_DIR: &str = "/usr/local/nvidia";

impl ToolkitSpec {
    pub fn install_dir(&self) -> &str {
        self.install_dir
            .as_deref()
            .filter(|d| !d.is_empty())
            .unwrap_or(DEFAULT_TOOLKIT_INSTALL_DIR)
    }
}

/// Kubernetes device plugin.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DevicePluginSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(flatten)]
    pub image: ImageSpec,

    #[serde(flatten)]
    pub overrides: WorkloadOverrides,

    /// Plugin configuration ConfigMap
    #[serde(default)]
    pub config: ConfigMapRef,
}

/// Standalone DCGM host engine.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DcgmSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(flatten)]
    pub image: ImageSpec,

    #[serde(flatten)]
    pub overrides: WorkloadOverrides,

    /// Host port the host engine listens on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port: Option<i32>,
}

pub const DEFAULT_DCGM_HOST_PORT: i32 = 5555;

impl DcgmSpec {
    pub fn host_port(&self) -> i32 {
        self.host_port.unwrap_or(DEFAULT_DCGM_HOST_PORT)
    }
}

/// DCGM metrics exporter.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DcgmExporterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(flatten)]
    pub image: ImageSpec,

    #[serde(flatten)]
    pub overrides: WorkloadOverrides,

    /// Custom metrics ConfigMap
    #[serde(default)]
    pub config: ConfigMapRef,
}

/// GPU feature discovery.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GpuFeatureDiscoverySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(flatten)]
    pub image: ImageSpec,

    #[serde(flatten)]
    pub overrides: WorkloadOverrides,
}

/// MIG exposure strategy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MigStrategy {
    None,
    #[default]
    Single,
    Mixed,
}

impl MigStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            MigStrategy::None => "none",
            MigStrategy::Single => "single",
            MigStrategy::Mixed => "mixed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MigSpec {
    #[serde(default)]
    pub strategy: MigStrategy,
}

/// MIG manager.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MigManagerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(flatten)]
    pub image: ImageSpec,

    #[serde(flatten)]
    pub overrides: WorkloadOverrides,

    /// mig-parted configuration ConfigMap
    #[serde(default)]
    pub config: ConfigMapRef,

    /// GPU clients configuration ConfigMap
    #[serde(default)]
    pub gpu_clients_config: ConfigMapRef,
}

/// Node status exporter (runs the validator image).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatusExporterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(flatten)]
    pub image: ImageSpec,

    #[serde(flatten)]
    pub overrides: WorkloadOverrides,
}

/// vGPU host manager.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VgpuManagerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(flatten)]
    pub image: ImageSpec,

    #[serde(flatten)]
    pub overrides: WorkloadOverrides,
}

/// vGPU device manager.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VgpuDeviceManagerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(flatten)]
    pub image: ImageSpec,

    #[serde(flatten)]
    pub overrides: WorkloadOverrides,

    /// vGPU devices configuration ConfigMap
    #[serde(default)]
    pub config: ConfigMapRef,
}

/// Confidential computing manager.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CcManagerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(flatten)]
    pub image: ImageSpec,

    #[serde(flatten)]
    pub overrides: WorkloadOverrides,

    /// CC mode applied to GPUs without an explicit node label: on, off or devtools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_mode: Option<String>,
}

const CC_MODES: &[&str] = &["on", "off", "devtools"];

impl CcManagerSpec {
    /// Validated default CC mode ("off" when unset).
    pub fn default_mode(&self) -> Result<&str, SpecError> {
        let mode = self.default_mode.as_deref().unwrap_or("off");
        if CC_MODES.contains(&mode) {
            Ok(mode)
        } else {
            Err(SpecError::InvalidValue {
                field: "ccManager.defaultMode",
                value: mode.to_string(),
                reason: format!("must be one of {}", CC_MODES.join(", ")),
            })
        }
    }
}

/// Environment overrides for one validation component.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorComponentSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVarSpec>,
}

/// Operator validator and the validation init containers of every operand.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(flatten)]
    pub image: ImageSpec,

    #[serde(flatten)]
    pub overrides: WorkloadOverrides,

    #[serde(default)]
    pub driver: ValidatorComponentSpec,

    #[serde(default)]
    pub toolkit: ValidatorComponentSpec,

    #[serde(default)]
    pub cuda: ValidatorComponentSpec,

    #[serde(default)]
    pub plugin: ValidatorComponentSpec,
}

/// Container Device Interface support.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CdiSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Make CDI the default injection mode of the NVIDIA runtime
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<bool>,
}

impl CdiSpec {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(false)
    }

    pub fn is_default(&self) -> bool {
        self.is_enabled() && self.default.unwrap_or(false)
    }
}
