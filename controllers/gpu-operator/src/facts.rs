//! Cluster facts discovery.
//!
//! Facts are recomputed at the start of every pass from node labels, node
//! status and the host `os-release` file. Nothing here is cached.

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use cluster_client::{ClusterClientTrait, ObjectKind, Selector, from_dynamic};
use crds::Runtime;
use k8s_openapi::api::core::v1::Node;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Set by node-feature-discovery on nodes with an NVIDIA PCI device
pub const NFD_GPU_LABEL: &str = "feature.node.kubernetes.io/pci-10de.present";
/// NFD labels for NVIDIA devices when PCI classes are part of the label
pub const NFD_GPU_CLASS_LABELS: [&str; 2] = [
    "feature.node.kubernetes.io/pci-0302_10de.present",
    "feature.node.kubernetes.io/pci-0300_10de.present",
];
/// Set by the operator on GPU nodes. Output only: presence is read from NFD.
pub const GPU_PRESENT_LABEL: &str = "nvidia.com/gpu.present";
pub const KERNEL_VERSION_LABEL: &str = "feature.node.kubernetes.io/kernel-version.full";
pub const OS_ID_LABEL: &str = "feature.node.kubernetes.io/system-os_release.ID";
pub const OS_VERSION_LABEL: &str = "feature.node.kubernetes.io/system-os_release.VERSION_ID";
pub const OS_IMAGE_REVISION_LABEL: &str = "feature.node.kubernetes.io/system-os_release.OSTREE_VERSION";
pub const OPENSHIFT_OS_LABEL: &str = "node.openshift.io/os_id";

/// Parsed `os-release` file. Missing keys read as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsRelease {
    values: BTreeMap<String, String>,
}

impl OsRelease {
    /// Parses `KEY=VALUE` lines, stripping optional quotes. Comments and
    /// malformed lines are skipped.
    pub fn parse(content: &str) -> Self {
        let values = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| {
                let v = v.trim();
                let v = v
                    .strip_prefix('"')
                    .and_then(|s| s.strip_suffix('"'))
                    .or_else(|| v.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
                    .unwrap_or(v);
                (k.trim().to_string(), v.to_string())
            })
            .collect();
        Self { values }
    }

    /// Reads and parses the file. A missing file is an error.
    pub async fn read(path: &Path) -> Result<Self, ControllerError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ControllerError::Facts(format!("cannot read {}: {}", path.display(), e)))?;
        Ok(Self::parse(&content))
    }

    pub fn get(&self, key: &str) -> &str {
        self.values.get(key).map(String::as_str).unwrap_or("")
    }

    pub fn id(&self) -> &str {
        self.get("ID")
    }

    pub fn version_id(&self) -> &str {
        self.get("VERSION_ID")
    }

    /// Image tag suffix for this distribution, e.g. "ubuntu22.04" or "rhel8".
    pub fn os_tag(&self) -> String {
        os_tag(self.id(), self.version_id())
    }

    /// RPM-based distributions use yum repositories and the pki trust store.
    pub fn is_rpm_family(&self) -> bool {
        is_rpm_family(self.id())
    }
}

/// RPM-based distribution ids.
pub fn is_rpm_family(id: &str) -> bool {
    matches!(id, "rhel" | "rhcos" | "centos" | "rocky" | "almalinux" | "fedora" | "ol" | "sles" | "amzn")
}

/// OS tag from distribution id and version. The RHEL family is tagged by
/// major version only.
pub fn os_tag(id: &str, version_id: &str) -> String {
    match id {
        "rhel" | "centos" | "rocky" | "almalinux" => {
            let major = version_id.split('.').next().unwrap_or(version_id);
            format!("{}{}", id, major)
        }
        _ => format!("{}{}", id, version_id),
    }
}

/// Facts gathered for one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterFacts {
    /// Container runtime on the GPU nodes
    pub runtime: Runtime,
    /// Full kernel version -> OS tag, one entry per distinct kernel on GPU nodes
    pub kernel_os_tags: BTreeMap<String, String>,
    /// OS image revision -> OS tag, one entry per distinct revision on GPU nodes
    pub os_image_revisions: BTreeMap<String, String>,
    /// OpenShift cluster
    pub enterprise_platform: bool,
    pub gpu_nodes_present: bool,
    pub host_os: OsRelease,
}

impl ClusterFacts {
    /// OS tag of the host the operator runs on.
    pub fn os_tag(&self) -> String {
        self.host_os.os_tag()
    }

    /// Derives the facts from the node list and the host OS release.
    pub fn from_nodes(nodes: &[Node], host_os: OsRelease, default_runtime: Runtime) -> Self {
        let host_tag = host_os.os_tag();
        let mut gpu_nodes: Vec<&Node> = nodes.iter().filter(|n| is_gpu_node(n)).collect();
        gpu_nodes.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));

        let mut kernel_os_tags = BTreeMap::new();
        let mut os_image_revisions = BTreeMap::new();
        for node in &gpu_nodes {
            let labels = node_labels(node);
            let tag = match (labels.get(OS_ID_LABEL), labels.get(OS_VERSION_LABEL)) {
                (Some(id), Some(version)) => os_tag(id, version),
                _ => host_tag.clone(),
            };
            if let Some(kernel) = labels.get(KERNEL_VERSION_LABEL).filter(|k| !k.is_empty()) {
                kernel_os_tags.entry(kernel.clone()).or_insert_with(|| tag.clone());
            }
            if let Some(revision) = labels.get(OS_IMAGE_REVISION_LABEL).filter(|r| !r.is_empty()) {
                os_image_revisions.entry(revision.clone()).or_insert(tag);
            }
        }

        let runtime = gpu_nodes
            .iter()
            .find_map(|n| node_runtime(n))
            .unwrap_or(default_runtime);

        Self {
            runtime,
            kernel_os_tags,
            os_image_revisions,
            enterprise_platform: nodes.iter().any(|n| node_labels(n).contains_key(OPENSHIFT_OS_LABEL)),
            gpu_nodes_present: !gpu_nodes.is_empty(),
            host_os,
        }
    }
}

fn node_labels(node: &Node) -> BTreeMap<String, String> {
    node.metadata.labels.clone().unwrap_or_default()
}

/// A node counts as a GPU node when node-feature-discovery reports an
/// NVIDIA PCI device on it.
pub fn is_gpu_node(node: &Node) -> bool {
    let labels = node_labels(node);
    std::iter::once(NFD_GPU_LABEL)
        .chain(NFD_GPU_CLASS_LABELS)
        .any(|key| labels.get(key).map(String::as_str) == Some("true"))
}

/// Runtime from `status.nodeInfo.containerRuntimeVersion` ("containerd://1.7.2").
fn node_runtime(node: &Node) -> Option<Runtime> {
    let version = node.status.as_ref()?.node_info.as_ref()?.container_runtime_version.as_str();
    match version.split_once("://").map(|(scheme, _)| scheme) {
        Some("containerd") => Some(Runtime::Containerd),
        Some("cri-o") => Some(Runtime::Crio),
        Some("docker") => Some(Runtime::Docker),
        _ => None,
    }
}

/// Gathers the facts for one pass.
pub async fn gather(
    client: &dyn ClusterClientTrait,
    config: &OperatorConfig,
    default_runtime: Runtime,
) -> Result<ClusterFacts, ControllerError> {
    let host_os = OsRelease::read(&config.os_release_path).await?;
    let nodes = client
        .list(ObjectKind::Node, None, &Selector::everything())
        .await?
        .iter()
        .map(from_dynamic::<Node>)
        .collect::<Result<Vec<_>, _>>()?;

    let facts = ClusterFacts::from_nodes(&nodes, host_os, default_runtime);
    if !facts.gpu_nodes_present {
        info!("No GPU nodes found yet");
    }
    debug!(
        "Cluster facts: runtime={}, kernels={:?}, os image revisions={:?}, openshift={}",
        facts.runtime,
        facts.kernel_os_tags,
        facts.os_image_revisions,
        facts.enterprise_platform
    );
    Ok(facts)
}

#[cfg(test)]
pub(crate) mod test_nodes {
    use super::*;
    use k8s_openapi::api::core::v1::{NodeStatus, NodeSystemInfo};
    use kube::api::ObjectMeta;

    /// GPU node with kernel/OS labels and a containerd runtime.
    pub fn gpu_node(name: &str, kernel: &str) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    [
                        (NFD_GPU_LABEL, "true"),
                        (KERNEL_VERSION_LABEL, kernel),
                        (OS_ID_LABEL, "ubuntu"),
                        (OS_VERSION_LABEL, "22.04"),
                    ]
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                ),
                ..Default::default()
            },
            status: Some(NodeStatus {
                node_info: Some(NodeSystemInfo {
                    container_runtime_version: "containerd://1.7.13".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}
