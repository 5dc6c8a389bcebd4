//! NVIDIA container toolkit DaemonSet.

use crate::error::ControllerError;
use crate::transform::TransformContext;
use crate::transform::env::set_env;
use crate::transform::image::resolve_image;
use crate::transform::pod::{add_mount, add_volume, apply_image_spec, container_mut, host_path_volume, mount, pod_spec_mut};
use crate::transform::runtime::wire_runtime;
use crds::Runtime;
use k8s_openapi::api::apps::v1::DaemonSet;

pub(super) const TOOLKIT_CONTAINER: &str = "nvidia-container-toolkit-ctr";

pub fn transform(ds: &mut DaemonSet, ctx: &TransformContext<'_>) -> Result<(), ControllerError> {
    let toolkit = &ctx.spec.toolkit;
    let image = resolve_image(&toolkit.image, ctx.config.images.toolkit.as_deref(), "container-toolkit")?;
    let pod = pod_spec_mut(ds)?;
    apply_image_spec(pod, TOOLKIT_CONTAINER, toolkit, &image)?;
    wire_runtime(pod, TOOLKIT_CONTAINER, ctx)?;

    let install_dir = toolkit.install_dir();
    let container = container_mut(pod, TOOLKIT_CONTAINER)?;
    set_env(container, "ROOT", install_dir);
    add_mount(container, mount("toolkit-install-dir", install_dir, false));

    let cdi = &ctx.spec.cdi;
    set_env(container, "CDI_ENABLED", cdi.is_enabled().to_string());
    if cdi.is_default() {
        set_env(container, "NVIDIA_CONTAINER_RUNTIME_MODE", "cdi");
    }
    if ctx.facts.runtime == Runtime::Containerd {
        set_env(container, "CONTAINERD_RUNTIME_CLASS", ctx.spec.operator.runtime_class());
    }

    add_volume(pod, host_path_volume("toolkit-install-dir", install_dir, Some("DirectoryOrCreate")));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::env::get_env;
    use crate::transform::test_support::{config, facts, template};
    use crds::ClusterPolicySpec;
    use k8s_openapi::api::core::v1::Container;

    fn toolkit(spec: &ClusterPolicySpec, runtime: Runtime) -> Container {
        let facts = facts(runtime);
        let config = config();
        let ctx = TransformContext::new(spec, &facts, &config);
        let mut ds = template("state-container-toolkit");
        transform(&mut ds, &ctx).unwrap();
        ds.spec.unwrap().template.spec.unwrap().containers.remove(0)
    }

    #[test]
    fn test_crio_toolkit() {
        let c = toolkit(&ClusterPolicySpec::default(), Runtime::Crio);
        assert_eq!(get_env(&c, "CRIO_SOCKET"), Some("/runtime/sock-dir/crio.sock"));
        assert_eq!(get_env(&c, "ROOT"), Some("/usr/local/nvidia"));
        assert_eq!(get_env(&c, "CDI_ENABLED"), Some("false"));
        assert_eq!(get_env(&c, "NVIDIA_CONTAINER_RUNTIME_MODE"), Some("auto"));
        assert_eq!(get_env(&c, "CONTAINERD_RUNTIME_CLASS"), None);
    }

    #[test]
    fn test_cdi_default_on_containerd() {
        let mut spec = ClusterPolicySpec::default();
        spec.cdi.enabled = Some(true);
        spec.cdi.default = Some(true);
        spec.toolkit.install_dir = Some("/opt/nvidia".to_string());
        let c = toolkit(&spec, Runtime::Containerd);

        assert_eq!(get_env(&c, "CDI_ENABLED"), Some("true"));
        assert_eq!(get_env(&c, "NVIDIA_CONTAINER_RUNTIME_MODE"), Some("cdi"));
        assert_eq!(get_env(&c, "CONTAINERD_RUNTIME_CLASS"), Some("nvidia"));
        assert_eq!(get_env(&c, "ROOT"), Some("/opt/nvidia"));

        // position of the template's variable is kept
        let env = c.env.unwrap();
        assert_eq!(env[0].name, "NVIDIA_CONTAINER_RUNTIME_MODE");
    }
}
