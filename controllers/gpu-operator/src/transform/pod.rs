//! Pod template helpers shared by the operand transforms.

use crate::error::ControllerError;
use crate::transform::env::apply_env_overrides;
use crds::HasImageSpec;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, HostPathVolumeSource, LocalObjectReference, PodSpec, ResourceRequirements,
    Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;

/// Pod spec of the DaemonSet template.
pub fn pod_spec_mut(ds: &mut DaemonSet) -> Result<&mut PodSpec, ControllerError> {
    ds.spec
        .as_mut()
        .and_then(|s| s.template.spec.as_mut())
        .ok_or_else(|| ControllerError::Template("DaemonSet without pod template spec".to_string()))
}

pub fn has_container(pod: &PodSpec, name: &str) -> bool {
    pod.containers.iter().any(|c| c.name == name)
        || pod.init_containers.iter().flatten().any(|c| c.name == name)
}

/// Main container `name`; its absence is a template error.
pub fn container_mut<'a>(pod: &'a mut PodSpec, name: &str) -> Result<&'a mut Container, ControllerError> {
    pod.containers
        .iter_mut()
        .find(|c| c.name == name)
        .ok_or_else(|| ControllerError::Template(format!("container {} not found", name)))
}

/// Init container `name`; its absence is a template error.
pub fn init_container_mut<'a>(pod: &'a mut PodSpec, name: &str) -> Result<&'a mut Container, ControllerError> {
    pod.init_containers
        .iter_mut()
        .flatten()
        .find(|c| c.name == name)
        .ok_or_else(|| ControllerError::Template(format!("init container {} not found", name)))
}

/// Main or init container `name`.
pub fn any_container_mut<'a>(pod: &'a mut PodSpec, name: &str) -> Result<&'a mut Container, ControllerError> {
    if pod.containers.iter().any(|c| c.name == name) {
        container_mut(pod, name)
    } else {
        init_container_mut(pod, name)
    }
}

fn mounted_volumes(container: &Container) -> impl Iterator<Item = &str> {
    container.volume_mounts.iter().flatten().map(|m| m.name.as_str())
}

/// Removes a container and every volume only it was mounting.
pub fn remove_container(pod: &mut PodSpec, name: &str) {
    let mut removed = Vec::new();
    pod.containers.retain(|c| {
        let keep = c.name != name;
        if !keep {
            removed.push(c.clone());
        }
        keep
    });
    if let Some(init) = pod.init_containers.as_mut() {
        init.retain(|c| {
            let keep = c.name != name;
            if !keep {
                removed.push(c.clone());
            }
            keep
        });
    }

    let orphaned: Vec<String> = removed
        .iter()
        .flat_map(mounted_volumes)
        .filter(|volume| {
            !pod.containers
                .iter()
                .chain(pod.init_containers.iter().flatten())
                .any(|c| mounted_volumes(c).any(|v| v == *volume))
        })
        .map(str::to_string)
        .collect();

    if let Some(volumes) = pod.volumes.as_mut() {
        volumes.retain(|v| !orphaned.contains(&v.name));
    }
}

/// Keeps or detaches an optional container. The container must exist in
/// the template either way.
pub fn toggle_container(pod: &mut PodSpec, name: &str, keep: bool) -> Result<(), ControllerError> {
    if !has_container(pod, name) {
        return Err(ControllerError::Template(format!("required container {} not found", name)));
    }
    if !keep {
        remove_container(pod, name);
    }
    Ok(())
}

/// Adds or replaces a volume by name.
pub fn add_volume(pod: &mut PodSpec, volume: Volume) {
    let volumes = pod.volumes.get_or_insert_with(Vec::new);
    match volumes.iter_mut().find(|v| v.name == volume.name) {
        Some(existing) => *existing = volume,
        None => volumes.push(volume),
    }
}

/// Adds or replaces a mount by mount path.
pub fn add_mount(container: &mut Container, mount: VolumeMount) {
    let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
    match mounts.iter_mut().find(|m| m.mount_path == mount.mount_path) {
        Some(existing) => *existing = mount,
        None => mounts.push(mount),
    }
}

pub fn mount(name: &str, path: &str, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: read_only.then_some(true),
        ..Default::default()
    }
}

pub fn host_path_volume(name: &str, path: &str, type_: Option<&str>) -> Volume {
    Volume {
        name: name.to_string(),
        host_path: Some(HostPathVolumeSource {
            path: path.to_string(),
            type_: type_.map(str::to_string),
        }),
        ..Default::default()
    }
}

pub fn config_map_volume(name: &str, config_map: &str) -> Volume {
    Volume {
        name: name.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: config_map.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Adds pull secrets to the pod, skipping names already referenced.
pub fn merge_pull_secrets(pod: &mut PodSpec, secrets: &[String]) {
    if secrets.is_empty() {
        return;
    }
    let refs = pod.image_pull_secrets.get_or_insert_with(Vec::new);
    for secret in secrets {
        if !refs.iter().any(|r| &r.name == secret) {
            refs.push(LocalObjectReference { name: secret.clone() });
        }
    }
}

/// Image, pull policy, pull secrets, resources, args and env of one
/// operand container.
pub fn apply_image_spec(
    pod: &mut PodSpec,
    container_name: &str,
    spec: &dyn HasImageSpec,
    image: &str,
) -> Result<(), ControllerError> {
    let container = any_container_mut(pod, container_name)?;
    container.image = Some(image.to_string());
    if let Some(policy) = spec.image_pull_policy() {
        container.image_pull_policy = Some(policy.to_string());
    }

    let overrides = spec.overrides();
    if let Some(resources) = overrides
        .resources
        .as_ref()
        .filter(|r| !r.limits.is_empty() || !r.requests.is_empty())
    {
        let quantities = |m: &BTreeMap<String, String>| {
            (!m.is_empty()).then(|| m.iter().map(|(k, v)| (k.clone(), Quantity(v.clone()))).collect())
        };
        container.resources = Some(ResourceRequirements {
            limits: quantities(&resources.limits),
            requests: quantities(&resources.requests),
            ..Default::default()
        });
    }
    if !overrides.args.is_empty() {
        container.args = Some(overrides.args.clone());
    }
    apply_env_overrides(container, &overrides.env);

    merge_pull_secrets(pod, spec.image_pull_secrets());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{DevicePluginSpec, ImageSpec, ResourceSpec, WorkloadOverrides};

    fn container(name: &str, volumes: &[&str]) -> Container {
        Container {
            name: name.to_string(),
            args: Some(vec!["--default".to_string()]),
            volume_mounts: Some(volumes.iter().map(|v| mount(v, &format!("/{}", v), false)).collect()),
            ..Default::default()
        }
    }

    fn pod() -> PodSpec {
        PodSpec {
            containers: vec![container("main", &["shared", "main-only"]), container("sidecar", &["shared", "sidecar-only"])],
            volumes: Some(vec![
                host_path_volume("shared", "/shared", None),
                host_path_volume("main-only", "/main-only", None),
                host_path_volume("sidecar-only", "/sidecar-only", None),
            ]),
            image_pull_secrets: Some(vec![LocalObjectReference {
                name: "ngc-secret".to_string(),
            }]),
            ..Default::default()
        }
    }

    #[test]
    fn test_remove_container_prunes_orphaned_volumes() {
        let mut pod = pod();
        toggle_container(&mut pod, "sidecar", false).unwrap();

        assert_eq!(pod.containers.len(), 1);
        let volumes: Vec<&str> = pod.volumes.iter().flatten().map(|v| v.name.as_str()).collect();
        assert_eq!(volumes, vec!["shared", "main-only"]);
    }

    #[test]
    fn test_toggle_missing_container_is_template_error() {
        let mut pod = pod();
        let err = toggle_container(&mut pod, "nvidia-peermem-ctr", true).unwrap_err();
        assert!(matches!(err, ControllerError::Template(_)));
    }

    #[test]
    fn test_apply_image_spec() {
        let mut pod = pod();
        let spec = DevicePluginSpec {
            image: ImageSpec {
                image_pull_policy: Some("Always".to_string()),
                image_pull_secrets: vec!["ngc-secret".to_string(), "private".to_string()],
                ..Default::default()
            },
            overrides: WorkloadOverrides {
                args: vec!["--fail-on-init-error=false".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };
        apply_image_spec(&mut pod, "main", &spec, "nvcr.io/nvidia/k8s-device-plugin:v0.15.0").unwrap();

        let main = &pod.containers[0];
        assert_eq!(main.image.as_deref(), Some("nvcr.io/nvidia/k8s-device-plugin:v0.15.0"));
        assert_eq!(main.image_pull_policy.as_deref(), Some("Always"));
        assert_eq!(main.args, Some(vec!["--fail-on-init-error=false".to_string()]));
        assert!(main.resources.is_none());

        let secrets: Vec<&str> = pod.image_pull_secrets.iter().flatten().map(|s| s.name.as_str()).collect();
        assert_eq!(secrets, vec!["ngc-secret", "private"]);
    }

    #[test]
    fn test_resources_applied_only_when_given() {
        let mut pod = pod();
        let mut spec = DevicePluginSpec::default();
        spec.overrides.resources = Some(ResourceSpec::default());
        apply_image_spec(&mut pod, "main", &spec, "image").unwrap();
        assert!(pod.containers[0].resources.is_none());
        assert_eq!(pod.containers[0].args, Some(vec!["--default".to_string()]));

        spec.overrides.resources = Some(ResourceSpec {
            limits: [("memory".to_string(), "1Gi".to_string())].into_iter().collect(),
            ..Default::default()
        });
        apply_image_spec(&mut pod, "main", &spec, "image").unwrap();
        let resources = pod.containers[0].resources.as_ref().unwrap();
        assert_eq!(resources.limits.as_ref().unwrap()["memory"], Quantity("1Gi".to_string()));
        assert!(resources.requests.is_none());
    }

    #[test]
    fn test_add_mount_replaces_by_path() {
        let mut c = container("main", &[]);
        add_mount(&mut c, mount("a", "/config", false));
        add_mount(&mut c, mount("b", "/config", true));
        let mounts = c.volume_mounts.unwrap();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].name, "b");
        assert_eq!(mounts[0].read_only, Some(true));
    }
}
