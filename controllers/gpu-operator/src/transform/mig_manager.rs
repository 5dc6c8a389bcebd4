//! MIG manager DaemonSet.

use crate::error::ControllerError;
use crate::transform::TransformContext;
use crate::transform::env::set_env;
use crate::transform::image::resolve_image;
use crate::transform::pod::{add_volume, apply_image_spec, config_map_volume, container_mut, pod_spec_mut};
use crate::transform::runtime::apply_runtime_class;
use k8s_openapi::api::apps::v1::DaemonSet;

pub(super) const MIG_MANAGER_CONTAINER: &str = "nvidia-mig-manager";

pub fn transform(ds: &mut DaemonSet, ctx: &TransformContext<'_>) -> Result<(), ControllerError> {
    let mig_manager = &ctx.spec.mig_manager;
    let image = resolve_image(&mig_manager.image, ctx.config.images.mig_manager.as_deref(), "mig-manager")?;
    let pod = pod_spec_mut(ds)?;
    apply_image_spec(pod, MIG_MANAGER_CONTAINER, mig_manager, &image)?;

    // user ConfigMaps replace the bundled defaults
    if let Some(config) = mig_manager.config.name() {
        add_volume(pod, config_map_volume("mig-parted-config", config));
    }
    if let Some(clients) = mig_manager.gpu_clients_config.name() {
        add_volume(pod, config_map_volume("gpu-clients", clients));
    }

    let container = container_mut(pod, MIG_MANAGER_CONTAINER)?;
    set_env(container, "CDI_ENABLED", ctx.spec.cdi.is_enabled().to_string());
    apply_runtime_class(pod, ctx);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::env::get_env;
    use crate::transform::test_support::{config, facts, template};
    use crds::{ClusterPolicySpec, Runtime};

    #[test]
    fn test_config_maps_default_and_custom() {
        let facts = facts(Runtime::Containerd);
        let config = config();

        let spec = ClusterPolicySpec::default();
        let mut ds = template("state-mig-manager");
        transform(&mut ds, &TransformContext::new(&spec, &facts, &config)).unwrap();
        let pod = ds.spec.unwrap().template.spec.unwrap();
        let cm = |pod: &k8s_openapi::api::core::v1::PodSpec, volume: &str| {
            pod.volumes
                .iter()
                .flatten()
                .find(|v| v.name == volume)
                .and_then(|v| v.config_map.as_ref())
                .map(|c| c.name.clone())
                .unwrap()
        };
        assert_eq!(cm(&pod, "mig-parted-config"), "default-mig-parted-config");
        assert_eq!(get_env(&pod.containers[0], "CDI_ENABLED"), Some("false"));

        let mut spec = ClusterPolicySpec::default();
        spec.mig_manager.config.name = Some("custom-mig-parted-config".to_string());
        let mut ds = template("state-mig-manager");
        transform(&mut ds, &TransformContext::new(&spec, &facts, &config)).unwrap();
        let pod = ds.spec.unwrap().template.spec.unwrap();
        assert_eq!(cm(&pod, "mig-parted-config"), "custom-mig-parted-config");
        assert_eq!(cm(&pod, "gpu-clients"), "default-gpu-clients");
    }
}
