//! vGPU manager and vGPU device manager DaemonSets.

use crate::error::ControllerError;
use crate::transform::TransformContext;
use crate::transform::env::set_env;
use crate::transform::image::{resolve_image, with_os_suffix};
use crate::transform::pod::{add_volume, apply_image_spec, config_map_volume, container_mut, pod_spec_mut};
use k8s_openapi::api::apps::v1::DaemonSet;

pub(super) const MANAGER_CONTAINER: &str = "nvidia-vgpu-manager-ctr";
pub(super) const DEVICE_MANAGER_CONTAINER: &str = "nvidia-vgpu-device-manager";

/// The vGPU manager image is built per OS, like the driver image.
pub fn transform_manager(ds: &mut DaemonSet, ctx: &TransformContext<'_>) -> Result<(), ControllerError> {
    let manager = &ctx.spec.vgpu_manager;
    let image = resolve_image(&manager.image, ctx.config.images.vgpu_manager.as_deref(), "vgpu-manager")?;
    let image = with_os_suffix(&image, &ctx.facts.os_tag());
    apply_image_spec(pod_spec_mut(ds)?, MANAGER_CONTAINER, manager, &image)
}

pub fn transform_device_manager(ds: &mut DaemonSet, ctx: &TransformContext<'_>) -> Result<(), ControllerError> {
    let device_manager = &ctx.spec.vgpu_device_manager;
    let image = resolve_image(
        &device_manager.image,
        ctx.config.images.vgpu_device_manager.as_deref(),
        "vgpu-device-manager",
    )?;
    let pod = pod_spec_mut(ds)?;
    apply_image_spec(pod, DEVICE_MANAGER_CONTAINER, device_manager, &image)?;

    if let Some(default) = device_manager.config.default.as_deref().filter(|d| !d.is_empty()) {
        set_env(container_mut(pod, DEVICE_MANAGER_CONTAINER)?, "DEFAULT_VGPU_CONFIG", default);
    }
    if let Some(config) = device_manager.config.name() {
        add_volume(pod, config_map_volume("vgpu-config", config));
    }
    Ok(())
}
