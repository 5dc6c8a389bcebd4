//! Kubernetes device plugin DaemonSet.

use crate::error::ControllerError;
use crate::transform::TransformContext;
use crate::transform::env::set_env;
use crate::transform::image::resolve_image;
use crate::transform::pod::{
    add_mount, add_volume, any_container_mut, apply_image_spec, config_map_volume, container_mut, mount, pod_spec_mut,
    toggle_container,
};
use crate::transform::runtime::apply_runtime_class;
use crds::HasImageSpec;
use k8s_openapi::api::apps::v1::DaemonSet;

pub(super) const PLUGIN_CONTAINER: &str = "nvidia-device-plugin";
const CONFIG_MANAGER: &str = "config-manager";
const CONFIG_MANAGER_INIT: &str = "config-manager-init";
const CONFIG_FILE: &str = "/config/config.yaml";
const CDI_ANNOTATION_PREFIX: &str = "cdi.k8s.io/";

pub fn transform(ds: &mut DaemonSet, ctx: &TransformContext<'_>) -> Result<(), ControllerError> {
    let plugin = &ctx.spec.device_plugin;
    let image = resolve_image(&plugin.image, ctx.config.images.device_plugin.as_deref(), "device-plugin")?;
    let pod = pod_spec_mut(ds)?;
    apply_image_spec(pod, PLUGIN_CONTAINER, plugin, &image)?;

    let main = container_mut(pod, PLUGIN_CONTAINER)?;
    set_env(main, "MIG_STRATEGY", ctx.spec.mig.strategy.as_str());
    if ctx.spec.cdi.is_enabled() {
        set_env(main, "DEVICE_LIST_STRATEGY", "cdi-annotations");
        set_env(main, "CDI_ANNOTATION_PREFIX", CDI_ANNOTATION_PREFIX);
    }

    let config = plugin.config.name();
    toggle_container(pod, CONFIG_MANAGER_INIT, config.is_some())?;
    toggle_container(pod, CONFIG_MANAGER, config.is_some())?;
    if let Some(config_map) = config {
        let default = plugin.config.default.as_deref().unwrap_or("");
        for name in [CONFIG_MANAGER_INIT, CONFIG_MANAGER] {
            let sidecar = any_container_mut(pod, name)?;
            sidecar.image = Some(image.clone());
            if let Some(policy) = plugin.image_pull_policy() {
                sidecar.image_pull_policy = Some(policy.to_string());
            }
            set_env(sidecar, "DEFAULT_CONFIG", default);
            add_mount(sidecar, mount("available-configs", "/available-configs", true));
        }
        let main = container_mut(pod, PLUGIN_CONTAINER)?;
        set_env(main, "CONFIG_FILE", CONFIG_FILE);
        add_mount(main, mount("config", "/config", false));
        add_volume(pod, config_map_volume("available-configs", config_map));
    }

    apply_runtime_class(pod, ctx);
    Ok(())
}
