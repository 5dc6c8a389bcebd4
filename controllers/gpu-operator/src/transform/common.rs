//! DaemonSet settings shared by every operand.

use crate::error::ControllerError;
use crate::transform::{OperandKind, TransformContext};
use crds::{MaxUnavailable, TolerationSpec, UpdateStrategy};
use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetUpdateStrategy, RollingUpdateDaemonSet};
use k8s_openapi::api::core::v1::Toleration;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

fn toleration(spec: &TolerationSpec) -> Toleration {
    Toleration {
        key: spec.key.clone(),
        operator: spec.operator.clone(),
        value: spec.value.clone(),
        effect: spec.effect.clone(),
        toleration_seconds: None,
    }
}

/// Applies the `daemonsets` section of the ClusterPolicy.
///
/// Labels and annotations never override keys set by the template. The
/// driver keeps its OnDelete strategy: restarting driver pods unloads the
/// kernel modules under running workloads.
pub fn apply(ds: &mut DaemonSet, operand: OperandKind, ctx: &TransformContext<'_>) -> Result<(), ControllerError> {
    let common = &ctx.spec.daemonsets;
    let max_unavailable = common.max_unavailable()?;

    let spec = ds
        .spec
        .as_mut()
        .ok_or_else(|| ControllerError::Template("DaemonSet without spec".to_string()))?;

    let meta = spec.template.metadata.get_or_insert_with(Default::default);
    let labels = meta.labels.get_or_insert_with(Default::default);
    for (k, v) in &common.labels {
        labels.entry(k.clone()).or_insert_with(|| v.clone());
    }
    if !common.annotations.is_empty() {
        let annotations = meta.annotations.get_or_insert_with(Default::default);
        for (k, v) in &common.annotations {
            annotations.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }

    let pod = spec
        .template
        .spec
        .as_mut()
        .ok_or_else(|| ControllerError::Template("DaemonSet without pod template spec".to_string()))?;
    if !common.tolerations.is_empty() {
        let tolerations = pod.tolerations.get_or_insert_with(Vec::new);
        for extra in common.tolerations.iter().map(toleration) {
            if !tolerations.contains(&extra) {
                tolerations.push(extra);
            }
        }
    }
    if let Some(class) = common.priority_class_name.as_deref().filter(|c| !c.is_empty()) {
        pod.priority_class_name = Some(class.to_string());
    }

    if operand == OperandKind::Driver {
        return Ok(());
    }
    match common.update_strategy {
        Some(UpdateStrategy::OnDelete) => {
            spec.update_strategy = Some(DaemonSetUpdateStrategy {
                type_: Some(UpdateStrategy::OnDelete.as_str().to_string()),
                rolling_update: None,
            });
        }
        Some(UpdateStrategy::RollingUpdate) | None => {
            if common.update_strategy.is_some() || max_unavailable.is_some() {
                spec.update_strategy = Some(DaemonSetUpdateStrategy {
                    type_: Some(UpdateStrategy::RollingUpdate.as_str().to_string()),
                    rolling_update: max_unavailable.map(|m| RollingUpdateDaemonSet {
                        max_unavailable: Some(match m {
                            MaxUnavailable::Count(n) => IntOrString::Int(n),
                            MaxUnavailable::Percent(p) => IntOrString::String(format!("{}%", p)),
                        }),
                        max_surge: None,
                    }),
                });
            }
        }
    }
    Ok(())
}
