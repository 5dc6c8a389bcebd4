//! Variant expansion.
//!
//! A variant-bound operand is deployed as one DaemonSet per kernel version
//! (precompiled drivers) or per OS image revision (OpenShift Driver
//! Toolkit). Every instance carries labels naming its base DaemonSet, axis
//! and key so stale instances can be found and pruned later.

use crate::error::ControllerError;
use crate::facts::{ClusterFacts, KERNEL_VERSION_LABEL, OS_IMAGE_REVISION_LABEL};
use crate::transform::OperandKind;
use cluster_client::{ClusterClientTrait, ObjectKind, Selector};
use crds::ClusterPolicySpec;
use k8s_openapi::api::apps::v1::DaemonSet;
use kube::api::DynamicObject;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

pub const VARIANT_OF_LABEL: &str = "gpuops.microscaler.io/variant-of";
pub const VARIANT_AXIS_LABEL: &str = "gpuops.microscaler.io/variant-axis";
pub const VARIANT_KEY_LABEL: &str = "gpuops.microscaler.io/variant-key";
/// Axis label value of a variant-less instance
pub const NO_AXIS: &str = "none";

const MAX_LABEL_VALUE_LEN: usize = 63;

/// Specialization axis of a variant-bound operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantAxis {
    /// One instance per running kernel version
    Kernel,
    /// One instance per OS image revision
    OsImage,
}

impl VariantAxis {
    pub fn as_str(self) -> &'static str {
        match self {
            VariantAxis::Kernel => "kernel",
            VariantAxis::OsImage => "os-image",
        }
    }

    /// Node label carrying the key of this axis.
    pub fn node_label(self) -> &'static str {
        match self {
            VariantAxis::Kernel => KERNEL_VERSION_LABEL,
            VariantAxis::OsImage => OS_IMAGE_REVISION_LABEL,
        }
    }
}

/// One physical instance of a variant-bound operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub axis: VariantAxis,
    /// Kernel version or OS image revision, as found on the nodes
    pub key: String,
    /// OS tag of the nodes carrying the key
    pub os_tag: String,
}

impl Variant {
    /// Name suffix and label value derived from the key.
    pub fn suffix(&self) -> String {
        sanitize_key(&self.key)
    }
}

/// Lowercases the key and maps characters outside `[a-z0-9.-]` to '.',
/// trimmed to a valid label value. A key that had to be rewritten or cut
/// gets a short hash of the original appended, so distinct keys never share
/// a suffix.
pub fn sanitize_key(key: &str) -> String {
    let mapped: String = key
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.' { c } else { '.' })
        .collect();
    let trimmed = mapped.trim_matches(|c: char| !c.is_ascii_alphanumeric());
    if trimmed == key && trimmed.len() <= MAX_LABEL_VALUE_LEN {
        return trimmed.to_string();
    }
    with_hash(trimmed, key, MAX_LABEL_VALUE_LEN)
}

fn short_hash(input: &str) -> String {
    Sha256::digest(input.as_bytes())
        .iter()
        .take(4)
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// `<prefix>-<hash of source>`, with `prefix` cut to fit in `max`.
/// `prefix` must be ASCII.
fn with_hash(prefix: &str, source: &str, max: usize) -> String {
    let hash = short_hash(source);
    let keep = max.saturating_sub(hash.len() + 1).min(prefix.len());
    let prefix = prefix[..keep].trim_end_matches(|c: char| !c.is_ascii_alphanumeric());
    if prefix.is_empty() {
        hash
    } else {
        format!("{}-{}", prefix, hash)
    }
}

/// Name of the instance of `base` for a variant suffix. Also used as the
/// pod `app` label, so it is kept within a label value.
pub fn instance_name(base: &str, suffix: &str) -> String {
    let name = format!("{}-{}", base, suffix);
    if name.len() <= MAX_LABEL_VALUE_LEN {
        return name;
    }
    with_hash(&name, &name, MAX_LABEL_VALUE_LEN)
}

/// Axis an operand is expanded along, if any. Precompiled drivers take
/// precedence over the Driver Toolkit.
pub fn select_axis(operand: OperandKind, spec: &ClusterPolicySpec, facts: &ClusterFacts) -> Option<VariantAxis> {
    if !operand.supports_variants() {
        return None;
    }
    if spec.driver.use_precompiled() {
        Some(VariantAxis::Kernel)
    } else if facts.enterprise_platform && spec.driver.use_openshift_driver_toolkit() {
        Some(VariantAxis::OsImage)
    } else {
        None
    }
}

/// Variants currently observed on GPU nodes, ordered by key.
pub fn variants(axis: VariantAxis, facts: &ClusterFacts) -> Vec<Variant> {
    let keys = match axis {
        VariantAxis::Kernel => &facts.kernel_os_tags,
        VariantAxis::OsImage => &facts.os_image_revisions,
    };
    keys.iter()
        .map(|(key, os_tag)| Variant {
            axis,
            key: key.clone(),
            os_tag: os_tag.clone(),
        })
        .collect()
}

fn set_labels(labels: &mut Option<BTreeMap<String, String>>, entries: &[(&str, &str)]) {
    let labels = labels.get_or_insert_with(BTreeMap::new);
    for (k, v) in entries {
        labels.insert(k.to_string(), v.to_string());
    }
}

/// Materializes the DaemonSets of one operand.
///
/// `factory` produces the transformed DaemonSet for a variant (or for the
/// single variant-less instance). Variant instances are renamed
/// `<base>-<suffix>` (see `instance_name`), get selector and pod `app`
/// label pinned to the new name, and a node selector on the axis label.
pub fn expand<F>(axis: Option<VariantAxis>, facts: &ClusterFacts, mut factory: F) -> Result<Vec<DaemonSet>, ControllerError>
where
    F: FnMut(Option<&Variant>) -> Result<DaemonSet, ControllerError>,
{
    let Some(axis) = axis else {
        let mut ds = factory(None)?;
        let base = ds.metadata.name.clone().unwrap_or_default();
        set_labels(
            &mut ds.metadata.labels,
            &[(VARIANT_OF_LABEL, base.as_str()), (VARIANT_AXIS_LABEL, NO_AXIS)],
        );
        return Ok(vec![ds]);
    };

    let mut out = Vec::new();
    for variant in variants(axis, facts) {
        let mut ds = factory(Some(&variant))?;
        let base = ds.metadata.name.clone().unwrap_or_default();
        let suffix = variant.suffix();
        let name = instance_name(&base, &suffix);

        ds.metadata.name = Some(name.clone());
        set_labels(
            &mut ds.metadata.labels,
            &[
                ("app", name.as_str()),
                (VARIANT_OF_LABEL, base.as_str()),
                (VARIANT_AXIS_LABEL, axis.as_str()),
                (VARIANT_KEY_LABEL, suffix.as_str()),
            ],
        );
        let spec = ds
            .spec
            .as_mut()
            .ok_or_else(|| ControllerError::Template(format!("DaemonSet {} without spec", base)))?;
        set_labels(&mut spec.selector.match_labels, &[("app", name.as_str())]);
        let template_meta = spec.template.metadata.get_or_insert_with(Default::default);
        set_labels(&mut template_meta.labels, &[("app", name.as_str())]);
        let pod = spec
            .template
            .spec
            .as_mut()
            .ok_or_else(|| ControllerError::Template(format!("DaemonSet {} without pod template spec", base)))?;
        set_labels(&mut pod.node_selector, &[(axis.node_label(), variant.key.as_str())]);

        debug!("Expanded {} for {} {}", name, axis.as_str(), variant.key);
        out.push(ds);
    }
    Ok(out)
}

/// Prune decision for one existing instance of an operand.
///
/// An instance is kept while any pod is scheduled for it, whatever its axis.
/// Otherwise an instance of another axis is left over from a mode switch and
/// goes, and an instance of the current axis goes once its key is gone from
/// the cluster.
pub fn is_stale(
    labels: &BTreeMap<String, String>,
    desired_scheduled: i64,
    axis: Option<VariantAxis>,
    live_suffixes: &BTreeSet<String>,
) -> bool {
    if desired_scheduled > 0 {
        return false;
    }
    let instance_axis = labels.get(VARIANT_AXIS_LABEL).map(String::as_str).unwrap_or(NO_AXIS);
    let current_axis = axis.map(VariantAxis::as_str).unwrap_or(NO_AXIS);
    if instance_axis != current_axis {
        return true;
    }
    if axis.is_none() {
        return false;
    }
    labels
        .get(VARIANT_KEY_LABEL)
        .is_none_or(|key| !live_suffixes.contains(key))
}

fn desired_scheduled(obj: &DynamicObject) -> i64 {
    obj.data
        .get("status")
        .and_then(|s| s.get("desiredNumberScheduled"))
        .and_then(|v| v.as_i64())
        .unwrap_or(0)
}

/// Deletes stale instances of `base`. Runs before the current variants are
/// applied. Returns the names of deleted DaemonSets.
pub async fn prune_stale(
    client: &dyn ClusterClientTrait,
    namespace: &str,
    base: &str,
    axis: Option<VariantAxis>,
    facts: &ClusterFacts,
) -> Result<Vec<String>, ControllerError> {
    let live: BTreeSet<String> = axis
        .map(|a| variants(a, facts).iter().map(Variant::suffix).collect())
        .unwrap_or_default();
    let selector = Selector::labels(format!("{}={}", VARIANT_OF_LABEL, base));
    let existing = client.list(ObjectKind::DaemonSet, Some(namespace), &selector).await?;

    let mut deleted = Vec::new();
    for obj in existing {
        let name = obj.metadata.name.clone().unwrap_or_default();
        let labels = obj.metadata.labels.clone().unwrap_or_default();
        let desired = desired_scheduled(&obj);
        if !is_stale(&labels, desired, axis, &live) {
            if desired > 0 {
                debug!("Keeping {}: {} pods still scheduled", name, desired);
            }
            continue;
        }

        match client.delete(ObjectKind::DaemonSet, Some(namespace), &name).await {
            Ok(()) => info!("Deleted stale DaemonSet {}", name),
            Err(e) if e.is_not_found() => debug!("Stale DaemonSet {} already gone", name),
            Err(e) => return Err(e.into()),
        }
        deleted.push(name);
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::OsRelease;
    use k8s_openapi::api::apps::v1::DaemonSetSpec;
    use k8s_openapi::api::core::v1::{PodSpec, PodTemplateSpec};
    use kube::api::ObjectMeta;

    fn facts(kernels: &[&str]) -> ClusterFacts {
        ClusterFacts {
            kernel_os_tags: kernels
                .iter()
                .map(|k| (k.to_string(), "ubuntu22.04".to_string()))
                .collect(),
            gpu_nodes_present: !kernels.is_empty(),
            host_os: OsRelease::parse("ID=ubuntu\nVERSION_ID=22.04\n"),
            ..Default::default()
        }
    }

    fn base_ds() -> DaemonSet {
        DaemonSet {
            metadata: ObjectMeta {
                name: Some("nvidia-driver-daemonset".to_string()),
                ..Default::default()
            },
            spec: Some(DaemonSetSpec {
                template: PodTemplateSpec {
                    spec: Some(PodSpec::default()),
                    ..Default::default()
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn labels(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("5.15.0-91-generic"), "5.15.0-91-generic");
        assert_eq!(sanitize_key("414.92.202402201450-0"), "414.92.202402201450-0");

        let rewritten = sanitize_key("5.14.0-284.el9_2.x86_64+rt");
        assert!(rewritten.starts_with("5.14.0-284.el9.2.x86.64.rt-"));
        assert_eq!(rewritten.len(), "5.14.0-284.el9.2.x86.64.rt".len() + 9);
        assert!(sanitize_key("_x_").starts_with("x-"));
    }

    #[test]
    fn test_sanitized_keys_do_not_collide() {
        let long_a = format!("{}1", "6".repeat(80));
        let long_b = format!("{}2", "6".repeat(80));
        let pairs = [
            ("5.15.0_a", "5.15.0.a"),
            ("5.15.0-91-Generic", "5.15.0-91-generic"),
            (long_a.as_str(), long_b.as_str()),
        ];
        for (a, b) in pairs {
            let (sa, sb) = (sanitize_key(a), sanitize_key(b));
            assert_ne!(sa, sb, "{} / {}", a, b);
            assert!(sa.len() <= 63 && sb.len() <= 63);
            assert!(sa.ends_with(|c: char| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn test_long_instance_names_fit_label_values() {
        let key = format!("5.15.0-{}-generic", "9".repeat(50));
        let suffix = sanitize_key(&key);
        let name = instance_name("nvidia-driver-daemonset", &suffix);
        assert!(name.len() <= 63);
        assert!(name.starts_with("nvidia-driver-daemonset-5.15.0-"));
        assert_ne!(name, instance_name("nvidia-driver-daemonset", &sanitize_key(&format!("{}x", key))));

        let facts = facts(&[key.as_str()]);
        let out = expand(Some(VariantAxis::Kernel), &facts, |_| Ok(base_ds())).unwrap();
        let labels = out[0].metadata.labels.as_ref().unwrap();
        assert_eq!(out[0].metadata.name.as_deref(), Some(name.as_str()));
        assert_eq!(labels["app"], name);
        assert_eq!(labels[VARIANT_KEY_LABEL], suffix);
    }

    #[test]
    fn test_axis_selection() {
        let mut spec = ClusterPolicySpec::default();
        let mut facts = facts(&[]);
        assert_eq!(select_axis(OperandKind::Driver, &spec, &facts), None);

        facts.enterprise_platform = true;
        assert_eq!(select_axis(OperandKind::Driver, &spec, &facts), Some(VariantAxis::OsImage));
        assert_eq!(select_axis(OperandKind::DevicePlugin, &spec, &facts), None);

        spec.driver.use_precompiled = Some(true);
        assert_eq!(select_axis(OperandKind::Driver, &spec, &facts), Some(VariantAxis::Kernel));
    }

    #[test]
    fn test_expand_per_kernel() {
        let facts = facts(&["5.15.0-a", "6.8.0-b"]);
        let out = expand(Some(VariantAxis::Kernel), &facts, |_| Ok(base_ds())).unwrap();
        let names: Vec<&str> = out.iter().map(|d| d.metadata.name.as_deref().unwrap()).collect();
        assert_eq!(names, vec!["nvidia-driver-daemonset-5.15.0-a", "nvidia-driver-daemonset-6.8.0-b"]);

        let spec = out[1].spec.as_ref().unwrap();
        assert_eq!(spec.selector.match_labels.as_ref().unwrap()["app"], "nvidia-driver-daemonset-6.8.0-b");
        let selector = spec.template.spec.as_ref().unwrap().node_selector.as_ref().unwrap();
        assert_eq!(selector[KERNEL_VERSION_LABEL], "6.8.0-b");
        let labels = out[1].metadata.labels.as_ref().unwrap();
        assert_eq!(labels[VARIANT_OF_LABEL], "nvidia-driver-daemonset");
        assert_eq!(labels[VARIANT_KEY_LABEL], "6.8.0-b");
    }

    #[test]
    fn test_expand_without_axis() {
        let out = expand(None, &facts(&["5.15.0-a"]), |variant| {
            assert!(variant.is_none());
            Ok(base_ds())
        })
        .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].metadata.name.as_deref(), Some("nvidia-driver-daemonset"));
        assert_eq!(out[0].metadata.labels.as_ref().unwrap()[VARIANT_AXIS_LABEL], NO_AXIS);
    }

    #[test]
    fn test_expand_propagates_factory_errors() {
        let err = expand(Some(VariantAxis::Kernel), &facts(&["5.15.0-a"]), |_| {
            Err(ControllerError::InvalidConfig("no driver image".to_string()))
        })
        .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_stale_rules() {
        let live: BTreeSet<String> = ["6.8.0-b".to_string()].into();
        let kernel = Some(VariantAxis::Kernel);
        let gone = labels(&[(VARIANT_AXIS_LABEL, "kernel"), (VARIANT_KEY_LABEL, "5.15.0-a")]);
        let current = labels(&[(VARIANT_AXIS_LABEL, "kernel"), (VARIANT_KEY_LABEL, "6.8.0-b")]);
        let plain = labels(&[(VARIANT_AXIS_LABEL, NO_AXIS)]);

        assert!(is_stale(&gone, 0, kernel, &live));
        assert!(!is_stale(&gone, 2, kernel, &live));
        assert!(!is_stale(&current, 0, kernel, &live));
        assert!(!is_stale(&plain, 0, None, &live));
        assert!(is_stale(&plain, 0, kernel, &live));
        assert!(is_stale(&current, 0, None, &live));
    }

    #[test]
    fn test_scheduled_instance_survives_axis_switch() {
        let live: BTreeSet<String> = BTreeSet::new();
        let kernel = labels(&[(VARIANT_AXIS_LABEL, "kernel"), (VARIANT_KEY_LABEL, "5.15.0-a")]);
        let plain = labels(&[(VARIANT_AXIS_LABEL, NO_AXIS)]);

        assert!(!is_stale(&kernel, 1, None, &live));
        assert!(!is_stale(&kernel, 1, Some(VariantAxis::OsImage), &live));
        assert!(!is_stale(&plain, 3, Some(VariantAxis::Kernel), &live));
    }
}
