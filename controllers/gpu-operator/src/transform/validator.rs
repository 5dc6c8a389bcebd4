//! Operator validator DaemonSet.
//!
//! The validator gates readiness of the whole stack, so its init containers
//! follow the operands that are enabled.

use crate::error::ControllerError;
use crate::transform::TransformContext;
use crate::transform::env::set_env;
use crate::transform::pod::{apply_image_spec, init_container_mut, pod_spec_mut, toggle_container};
use crate::transform::runtime::apply_runtime_class;
use crate::transform::validation::validator_image;
use k8s_openapi::api::apps::v1::DaemonSet;

pub(super) const VALIDATOR_CONTAINER: &str = "nvidia-operator-validator";

pub fn transform(ds: &mut DaemonSet, ctx: &TransformContext<'_>) -> Result<(), ControllerError> {
    let spec = ctx.spec;
    let image = validator_image(ctx)?;
    let pod = pod_spec_mut(ds)?;
    apply_image_spec(pod, VALIDATOR_CONTAINER, &spec.validator, &image)?;

    toggle_container(pod, "cc-manager-validation", spec.cc_manager.is_enabled())?;
    toggle_container(pod, "vgpu-devices-validation", spec.vgpu_device_manager.is_enabled())?;
    toggle_container(pod, "plugin-validation", spec.device_plugin.is_enabled())?;
    if spec.device_plugin.is_enabled() {
        set_env(
            init_container_mut(pod, "plugin-validation")?,
            "MIG_STRATEGY",
            spec.mig.strategy.as_str(),
        );
    }

    apply_runtime_class(pod, ctx);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::env::get_env;
    use crate::transform::pod::has_container;
    use crate::transform::test_support::{config, facts, template};
    use crds::{ClusterPolicySpec, Runtime};
    use k8s_openapi::api::core::v1::PodSpec;

    fn run(spec: &ClusterPolicySpec) -> PodSpec {
        let facts = facts(Runtime::Containerd);
        let config = config();
        let mut ds = template("state-operator-validation");
        transform(&mut ds, &TransformContext::new(spec, &facts, &config)).unwrap();
        ds.spec.unwrap().template.spec.unwrap()
    }

    #[test]
    fn test_default_validations() {
        let pod = run(&ClusterPolicySpec::default());
        assert!(has_container(&pod, "driver-validation"));
        assert!(has_container(&pod, "plugin-validation"));
        assert!(!has_container(&pod, "cc-manager-validation"));
        assert!(!has_container(&pod, "vgpu-devices-validation"));

        let plugin = pod
            .init_containers
            .iter()
            .flatten()
            .find(|c| c.name == "plugin-validation")
            .unwrap();
        assert_eq!(get_env(plugin, "MIG_STRATEGY"), Some("single"));
        assert_eq!(pod.runtime_class_name.as_deref(), Some("nvidia"));
    }

    #[test]
    fn test_validations_follow_operands() {
        let mut spec = ClusterPolicySpec::default();
        spec.device_plugin.enabled = Some(false);
        spec.cc_manager.enabled = Some(true);
        let pod = run(&spec);
        assert!(!has_container(&pod, "plugin-validation"));
        assert!(has_container(&pod, "cc-manager-validation"));
    }
}
