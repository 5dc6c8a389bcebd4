//! Confidential computing manager DaemonSet.

use crate::error::ControllerError;
use crate::transform::TransformContext;
use crate::transform::env::set_env;
use crate::transform::image::resolve_image;
use crate::transform::pod::{apply_image_spec, container_mut, pod_spec_mut};
use k8s_openapi::api::apps::v1::DaemonSet;

pub(super) const CC_MANAGER_CONTAINER: &str = "nvidia-cc-manager";

pub fn transform(ds: &mut DaemonSet, ctx: &TransformContext<'_>) -> Result<(), ControllerError> {
    let cc = &ctx.spec.cc_manager;
    let mode = cc.default_mode()?;
    let image = resolve_image(&cc.image, ctx.config.images.cc_manager.as_deref(), "cc-manager")?;
    let pod = pod_spec_mut(ds)?;
    apply_image_spec(pod, CC_MANAGER_CONTAINER, cc, &image)?;
    set_env(container_mut(pod, CC_MANAGER_CONTAINER)?, "DEFAULT_CC_MODE", mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::env::get_env;
    use crate::transform::test_support::{config, facts, template};
    use crds::{ClusterPolicySpec, Runtime};

    #[test]
    fn test_default_cc_mode() {
        let mut spec = ClusterPolicySpec::default();
        spec.cc_manager.default_mode = Some("on".to_string());
        let facts = facts(Runtime::Containerd);
        let config = config();
        let mut ds = template("state-cc-manager");
        transform(&mut ds, &TransformContext::new(&spec, &facts, &config)).unwrap();
        let pod = ds.spec.unwrap().template.spec.unwrap();
        assert_eq!(get_env(&pod.containers[0], "DEFAULT_CC_MODE"), Some("on"));
    }

    #[test]
    fn test_invalid_cc_mode_is_config_error() {
        let mut spec = ClusterPolicySpec::default();
        spec.cc_manager.default_mode = Some("strict".to_string());
        let facts = facts(Runtime::Containerd);
        let config = config();
        let mut ds = template("state-cc-manager");
        let err = transform(&mut ds, &TransformContext::new(&spec, &facts, &config)).unwrap_err();
        assert!(!err.is_retryable());
    }
}
