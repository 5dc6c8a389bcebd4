//! GPU driver DaemonSet.
//!
//! The driver is the only variant-bound operand: with precompiled drivers
//! one DaemonSet runs per kernel version, on OpenShift with the Driver
//! Toolkit one per RHCOS image revision.

use crate::error::ControllerError;
use crate::facts::is_rpm_family;
use crate::transform::TransformContext;
use crate::transform::env::set_env;
use crate::transform::image::{precompiled, resolve_image, with_os_suffix, with_tag_if_missing};
use crate::transform::pod::{
    add_mount, add_volume, any_container_mut, apply_image_spec, config_map_volume, container_mut, mount, pod_spec_mut,
    toggle_container,
};
use crate::variant::{Variant, VariantAxis};
use crds::HasImageSpec;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::PodSpec;

pub(super) const DRIVER_CONTAINER: &str = "nvidia-driver-ctr";
const PEERMEM_CONTAINER: &str = "nvidia-peermem-ctr";
const GDS_CONTAINER: &str = "nvidia-fs-ctr";
const DTK_CONTAINER: &str = "openshift-driver-toolkit-ctr";
const MOFED_VALIDATION: &str = "mofed-validation";
const DTK_SHARED_VOLUME: &str = "shared-nvidia-driver-toolkit";
const DTK_SHARED_DIR: &str = "/mnt/shared-nvidia-driver-toolkit";

/// OS tag the images of this DaemonSet are built for.
fn os_tag(ctx: &TransformContext<'_>) -> String {
    match ctx.variant {
        Some(variant) => variant.os_tag.clone(),
        None => ctx.facts.os_tag(),
    }
}

fn rpm_family(ctx: &TransformContext<'_>) -> bool {
    match ctx.variant {
        Some(variant) => is_rpm_family(variant.os_tag.trim_end_matches(|c: char| c.is_ascii_digit() || c == '.')),
        None => ctx.facts.host_os.is_rpm_family(),
    }
}

fn driver_image(ctx: &TransformContext<'_>) -> Result<String, ControllerError> {
    let base = resolve_image(&ctx.spec.driver.image, ctx.config.images.driver.as_deref(), "driver")?;
    Ok(match ctx.variant {
        Some(Variant {
            axis: VariantAxis::Kernel,
            key,
            os_tag,
        }) => precompiled(&base, key, os_tag),
        _ => with_os_suffix(&base, &os_tag(ctx)),
    })
}

pub fn transform(ds: &mut DaemonSet, ctx: &TransformContext<'_>) -> Result<(), ControllerError> {
    let driver = &ctx.spec.driver;
    let image = driver_image(ctx)?;
    let pod = pod_spec_mut(ds)?;
    apply_image_spec(pod, DRIVER_CONTAINER, driver, &image)?;

    rdma(pod, ctx, &image)?;
    gds(pod, ctx)?;
    driver_toolkit(pod, ctx)?;
    config_maps(pod, ctx)?;
    Ok(())
}

/// GPUDirect RDMA: peer memory helper plus the MOFED validation gate.
fn rdma(pod: &mut PodSpec, ctx: &TransformContext<'_>, image: &str) -> Result<(), ControllerError> {
    let rdma = &ctx.spec.driver.rdma;
    let enabled = rdma.is_enabled();
    toggle_container(pod, PEERMEM_CONTAINER, enabled)?;
    toggle_container(pod, MOFED_VALIDATION, enabled)?;
    if !enabled {
        return Ok(());
    }

    let use_host_mofed = rdma.use_host_mofed().to_string();
    let peermem = container_mut(pod, PEERMEM_CONTAINER)?;
    peermem.image = Some(image.to_string());
    if let Some(policy) = ctx.spec.driver.image_pull_policy() {
        peermem.image_pull_policy = Some(policy.to_string());
    }
    set_env(peermem, "USE_HOST_MOFED", use_host_mofed.as_str());

    let main = container_mut(pod, DRIVER_CONTAINER)?;
    set_env(main, "GPU_DIRECT_RDMA_ENABLED", "true");
    set_env(main, "USE_HOST_MOFED", use_host_mofed.as_str());

    let validation = any_container_mut(pod, MOFED_VALIDATION)?;
    set_env(validation, "USE_HOST_MOFED", use_host_mofed.as_str());
    Ok(())
}

/// GPUDirect Storage: the nvidia-fs module container.
fn gds(pod: &mut PodSpec, ctx: &TransformContext<'_>) -> Result<(), ControllerError> {
    let gds = &ctx.spec.driver.gds;
    toggle_container(pod, GDS_CONTAINER, gds.is_enabled())?;
    if !gds.is_enabled() {
        return Ok(());
    }
    let image = resolve_image(&gds.image, ctx.config.images.gds.as_deref(), "gds")?;
    apply_image_spec(pod, GDS_CONTAINER, gds, &with_os_suffix(&image, &os_tag(ctx)))?;
    set_env(container_mut(pod, DRIVER_CONTAINER)?, "GDS_ENABLED", "true");
    Ok(())
}

/// Driver Toolkit sidecar, used only for per-OS-image-revision variants.
fn driver_toolkit(pod: &mut PodSpec, ctx: &TransformContext<'_>) -> Result<(), ControllerError> {
    let revision = match ctx.variant {
        Some(variant) if variant.axis == VariantAxis::OsImage => Some(variant.key.as_str()),
        _ => None,
    };
    toggle_container(pod, DTK_CONTAINER, revision.is_some())?;
    let Some(revision) = revision else {
        return Ok(());
    };

    let base = ctx
        .spec
        .driver
        .driver_toolkit_image
        .as_deref()
        .filter(|i| !i.is_empty())
        .or(ctx.config.images.driver_toolkit.as_deref())
        .ok_or_else(|| ControllerError::InvalidConfig("no Driver Toolkit image configured".to_string()))?;

    let dtk = container_mut(pod, DTK_CONTAINER)?;
    dtk.image = Some(with_tag_if_missing(base, revision));
    set_env(dtk, "RHCOS_VERSION", revision);

    let main = container_mut(pod, DRIVER_CONTAINER)?;
    set_env(main, "RHCOS_VERSION", revision);
    set_env(main, "DRIVER_TOOLKIT_SHARED_DIR", DTK_SHARED_DIR);
    add_mount(main, mount(DTK_SHARED_VOLUME, DTK_SHARED_DIR, false));
    Ok(())
}

/// Kernel module parameters, package repositories and CA certificates.
fn config_maps(pod: &mut PodSpec, ctx: &TransformContext<'_>) -> Result<(), ControllerError> {
    let driver = &ctx.spec.driver;
    let rpm = rpm_family(ctx);
    let entries = [
        (driver.kernel_module_config.name(), "kernel-module-config", "/drivers"),
        (
            driver.repo_config.name(),
            "repo-config",
            if rpm { "/etc/yum.repos.d" } else { "/etc/apt/sources.list.d" },
        ),
        (
            driver.cert_config.name(),
            "cert-config",
            if rpm { "/etc/pki/ca-trust/extracted/pem" } else { "/etc/ssl/certs" },
        ),
    ];

    for (config_map, volume, path) in entries {
        let Some(config_map) = config_map else {
            continue;
        };
        add_mount(container_mut(pod, DRIVER_CONTAINER)?, mount(volume, path, true));
        add_volume(pod, config_map_volume(volume, config_map));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::env::get_env;
    use crate::transform::pod::has_container;
    use crate::transform::test_support::{config, facts, template};
    use crds::{ClusterPolicySpec, ConfigMapRef, Runtime};
    use k8s_openapi::api::core::v1::Container;

    fn run(spec: &ClusterPolicySpec, variant: Option<&Variant>) -> PodSpec {
        let facts = facts(Runtime::Containerd);
        let config = config();
        let ctx = TransformContext::new(spec, &facts, &config);
        let ctx = ctx.with_variant(variant);
        let mut ds = template("state-driver");
        transform(&mut ds, &ctx).unwrap();
        ds.spec.unwrap().template.spec.unwrap()
    }

    fn main(pod: &PodSpec) -> &Container {
        pod.containers.iter().find(|c| c.name == DRIVER_CONTAINER).unwrap()
    }

    fn volume_names(pod: &PodSpec) -> Vec<&str> {
        pod.volumes.iter().flatten().map(|v| v.name.as_str()).collect()
    }

    #[test]
    fn test_default_driver_detaches_optional_containers() {
        let pod = run(&ClusterPolicySpec::default(), None);
        assert_eq!(main(&pod).image.as_deref(), Some("nvcr.io/nvidia/driver:550.54.15-ubuntu22.04"));
        assert_eq!(pod.containers.len(), 1);
        assert!(!has_container(&pod, MOFED_VALIDATION));

        let volumes = volume_names(&pod);
        assert!(!volumes.contains(&"run-mellanox-drivers"));
        assert!(!volumes.contains(&"run-nvidia-fs"));
        assert!(!volumes.contains(&DTK_SHARED_VOLUME));
        assert!(!volumes.contains(&"run-nvidia-validations"));
        assert!(volumes.contains(&"run-nvidia"));
    }

    #[test]
    fn test_rdma_and_gds() {
        let mut spec = ClusterPolicySpec::default();
        spec.driver.rdma.enabled = Some(true);
        spec.driver.rdma.use_host_mofed = Some(true);
        spec.driver.gds.enabled = Some(true);
        let pod = run(&spec, None);

        assert!(has_container(&pod, PEERMEM_CONTAINER));
        assert!(has_container(&pod, MOFED_VALIDATION));
        assert_eq!(get_env(main(&pod), "GPU_DIRECT_RDMA_ENABLED"), Some("true"));
        assert_eq!(get_env(main(&pod), "USE_HOST_MOFED"), Some("true"));

        let gds = pod.containers.iter().find(|c| c.name == GDS_CONTAINER).unwrap();
        assert_eq!(gds.image.as_deref(), Some("nvcr.io/nvidia/cloud-native/nvidia-fs:2.17.5-ubuntu22.04"));
    }

    #[test]
    fn test_precompiled_variant_image() {
        let variant = Variant {
            axis: VariantAxis::Kernel,
            key: "5.15.0-91-generic".to_string(),
            os_tag: "ubuntu22.04".to_string(),
        };
        let pod = run(&ClusterPolicySpec::default(), Some(&variant));
        assert_eq!(
            main(&pod).image.as_deref(),
            Some("nvcr.io/nvidia/driver:550.54.15-5.15.0-91-generic-ubuntu22.04")
        );
        assert!(!has_container(&pod, DTK_CONTAINER));
    }

    #[test]
    fn test_driver_toolkit_variant() {
        let variant = Variant {
            axis: VariantAxis::OsImage,
            key: "414.92.202402201450-0".to_string(),
            os_tag: "rhcos4.14".to_string(),
        };
        let mut spec = ClusterPolicySpec::default();
        spec.driver.repo_config = ConfigMapRef {
            name: Some("custom-repos".to_string()),
            default: None,
        };
        let pod = run(&spec, Some(&variant));

        let dtk = pod.containers.iter().find(|c| c.name == DTK_CONTAINER).unwrap();
        assert_eq!(
            dtk.image.as_deref(),
            Some("quay.io/openshift-release-dev/driver-toolkit:414.92.202402201450-0")
        );
        assert_eq!(get_env(main(&pod), "RHCOS_VERSION"), Some("414.92.202402201450-0"));
        assert_eq!(main(&pod).image.as_deref(), Some("nvcr.io/nvidia/driver:550.54.15-rhcos4.14"));

        let repo = main(&pod)
            .volume_mounts
            .iter()
            .flatten()
            .find(|m| m.name == "repo-config")
            .unwrap();
        assert_eq!(repo.mount_path, "/etc/yum.repos.d");
    }

    #[test]
    fn test_config_maps_on_debian_family() {
        let mut spec = ClusterPolicySpec::default();
        spec.driver.kernel_module_config.name = Some("kernel-module-params".to_string());
        spec.driver.cert_config.name = Some("custom-ca".to_string());
        let pod = run(&spec, None);

        let paths: Vec<&str> = main(&pod)
            .volume_mounts
            .iter()
            .flatten()
            .map(|m| m.mount_path.as_str())
            .collect();
        assert!(paths.contains(&"/drivers"));
        assert!(paths.contains(&"/etc/ssl/certs"));
        assert!(!paths.contains(&"/etc/apt/sources.list.d"));

        let cert = pod.volumes.iter().flatten().find(|v| v.name == "cert-config").unwrap();
        assert_eq!(cert.config_map.as_ref().unwrap().name, "custom-ca");
    }
}
