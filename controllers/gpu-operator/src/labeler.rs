//! GPU node labeling.
//!
//! Operand DaemonSets select on `nvidia.com/gpu.deploy.<operand>=true`. The
//! labeler adds those labels to GPU nodes so operands land there, leaving
//! any value an administrator already set untouched: a node labeled
//! `nvidia.com/gpu.deploy.driver=false` keeps running its own driver.
//!
//! When node-feature-discovery stops reporting a GPU on a node, the labels
//! the operator owns are removed again so operands leave the node.

use crate::error::ControllerError;
use crate::facts::{GPU_PRESENT_LABEL, is_gpu_node};
use crate::transform::OperandKind;
use cluster_client::{ClusterClientTrait, ObjectKind, Selector, from_dynamic};
use k8s_openapi::api::core::v1::Node;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

pub const DEPLOY_LABEL_PREFIX: &str = "nvidia.com/gpu.deploy.";

pub fn deploy_label(operand: OperandKind) -> String {
    format!("{}{}", DEPLOY_LABEL_PREFIX, operand.deploy_label_suffix())
}

/// Labels a GPU node should carry on top of `current`, or `None` when
/// nothing is missing.
pub fn missing_labels(current: &BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    let wanted = std::iter::once(GPU_PRESENT_LABEL.to_string()).chain(OperandKind::ALL.iter().map(|o| deploy_label(*o)));
    let missing: BTreeMap<String, String> = wanted
        .filter(|key| !current.contains_key(key))
        .map(|key| (key, "true".to_string()))
        .collect();
    (!missing.is_empty()).then_some(missing)
}

/// Operator-owned labels present on a node that no longer has a GPU.
pub fn stale_labels(current: &BTreeMap<String, String>) -> Vec<String> {
    current
        .keys()
        .filter(|key| key.as_str() == GPU_PRESENT_LABEL || key.starts_with(DEPLOY_LABEL_PREFIX))
        .cloned()
        .collect()
}

/// Adds the missing labels to every GPU node and strips them from nodes
/// without a GPU. Returns the number of nodes updated. Failures on a single
/// node are logged and skipped.
pub async fn label_gpu_nodes(client: &dyn ClusterClientTrait) -> Result<usize, ControllerError> {
    let nodes = client.list(ObjectKind::Node, None, &Selector::everything()).await?;
    let mut updated = 0;

    for mut obj in nodes {
        let name = obj.metadata.name.clone().unwrap_or_default();
        let node: Node = from_dynamic(&obj)?;
        let labels = obj.metadata.labels.get_or_insert_with(BTreeMap::new);
        if is_gpu_node(&node) {
            let Some(missing) = missing_labels(labels) else {
                continue;
            };
            debug!("Adding {} labels to node {}", missing.len(), name);
            labels.extend(missing);
        } else {
            let stale = stale_labels(labels);
            if stale.is_empty() {
                continue;
            }
            debug!("Removing {} GPU labels from node {}", stale.len(), name);
            for key in &stale {
                labels.remove(key);
            }
        }

        match client.update(ObjectKind::Node, &obj).await {
            Ok(_) => updated += 1,
            Err(e) => warn!("Failed to label node {}: {}", name, e),
        }
    }

    if updated > 0 {
        info!("Updated GPU labels on {} nodes", updated);
    }
    Ok(updated)
}
