//! GPUops CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the GPU operator.
//!
//! The single `ClusterPolicy` resource is the declarative configuration of the
//! whole GPU software stack: one sub-spec per operand (driver, container
//! toolkit, device plugin, exporter, MIG/vGPU/CC managers, validators).

pub mod cluster_policy;
pub mod components;
pub mod daemonsets;

pub use cluster_policy::*;
pub use components::*;
pub use daemonsets::*;
