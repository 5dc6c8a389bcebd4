//! ClusterPolicy CRD
//!
//! Declarative configuration of the GPU software stack. The operator
//! reconciles the cluster against the oldest ClusterPolicy; any other
//! instance is marked `ignored`.

use crate::components::*;
use crate::daemonsets::DaemonsetsSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "gpuops.microscaler.io",
    version = "v1alpha1",
    kind = "ClusterPolicy",
    plural = "clusterpolicies",
    status = "ClusterPolicyStatus",
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPolicySpec {
    #[serde(default)]
    pub operator: OperatorSpec,

    #[serde(default)]
    pub daemonsets: DaemonsetsSpec,

    #[serde(default)]
    pub driver: DriverSpec,

    #[serde(default)]
    pub toolkit: ToolkitSpec,

    #[serde(default)]
    pub device_plugin: DevicePluginSpec,

    #[serde(default)]
    pub dcgm: DcgmSpec,

    #[serde(default)]
    pub dcgm_exporter: DcgmExporterSpec,

    #[serde(default)]
    pub gfd: GpuFeatureDiscoverySpec,

    #[serde(default)]
    pub mig: MigSpec,

    #[serde(default)]
    pub mig_manager: MigManagerSpec,

    #[serde(default)]
    pub node_status_exporter: NodeStatusExporterSpec,

    #[serde(default)]
    pub vgpu_manager: VgpuManagerSpec,

    #[serde(default)]
    pub vgpu_device_manager: VgpuDeviceManagerSpec,

    #[serde(default)]
    pub cc_manager: CcManagerSpec,

    #[serde(default)]
    pub validator: ValidatorSpec,

    #[serde(default)]
    pub cdi: CdiSpec,
}

/// Aggregate state of the whole policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PolicyState {
    Ready,
    #[default]
    NotReady,
    /// Every operand is disabled
    Disabled,
    /// Another ClusterPolicy is already active
    Ignored,
}

/// Per-operand state reported in the status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum OperandState {
    Ready,
    #[default]
    NotReady,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OperandStatus {
    /// State name (e.g. "state-driver")
    pub name: String,

    pub state: OperandState,

    /// Reason the operand is not ready
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPolicyStatus {
    pub state: PolicyState,

    /// Namespace the operands are deployed into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operands: Vec<OperandStatus>,

    /// First configuration error of the last pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Last reconciliation timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled: Option<chrono::DateTime<chrono::Utc>>,
}

impl ClusterPolicyStatus {
    /// True when everything but the timestamp matches `other`.
    pub fn same_outcome(&self, other: &ClusterPolicyStatus) -> bool {
        self.state == other.state
            && self.namespace == other.namespace
            && self.operands == other.operands
            && self.error == other.error
    }
}
