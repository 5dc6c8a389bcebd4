//! Validation init containers.
//!
//! Every init container named `<component>-validation` runs the validator
//! image. The cuda and plugin validators launch a workload pod of their
//! own, so they also receive the validator image settings and the runtime
//! class to use for it.

use crate::error::ControllerError;
use crate::transform::TransformContext;
use crate::transform::env::{apply_env_overrides, set_env};
use crate::transform::image::resolve_image;
use crate::transform::pod::{merge_pull_secrets, pod_spec_mut};
use crate::transform::runtime::runtime_class_name;
use crds::{EnvVarSpec, HasImageSpec, ValidatorSpec};
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{Container, SecurityContext};

pub const VALIDATION_SUFFIX: &str = "-validation";

const COMPONENTS: &[&str] = &[
    "driver",
    "toolkit",
    "cuda",
    "plugin",
    "mofed",
    "nvidia-fs",
    "cc-manager",
    "vgpu-manager",
    "vgpu-devices",
];

/// Validator image from the ClusterPolicy, or the operator default.
pub fn validator_image(ctx: &TransformContext<'_>) -> Result<String, ControllerError> {
    resolve_image(&ctx.spec.validator.image, ctx.config.images.validator.as_deref(), "validator")
}

/// User env of a validation component. Unknown components are rejected.
pub fn component_env<'a>(validator: &'a ValidatorSpec, component: &str) -> Result<&'a [EnvVarSpec], ControllerError> {
    match component {
        "driver" => Ok(&validator.driver.env),
        "toolkit" => Ok(&validator.toolkit.env),
        "cuda" => Ok(&validator.cuda.env),
        "plugin" => Ok(&validator.plugin.env),
        c if COMPONENTS.contains(&c) => Ok(&[]),
        other => Err(ControllerError::InvalidConfig(format!(
            "invalid validation component {:?}",
            other
        ))),
    }
}

fn validation_component(container: &Container) -> Option<&str> {
    container.name.strip_suffix(VALIDATION_SUFFIX)
}

/// Wires every validation init container of the DaemonSet.
pub fn apply(ds: &mut DaemonSet, ctx: &TransformContext<'_>) -> Result<(), ControllerError> {
    let validator = &ctx.spec.validator;
    let pod = pod_spec_mut(ds)?;
    let mut resolved: Option<String> = None;
    let mut wired = false;

    for container in pod.init_containers.iter_mut().flatten() {
        let Some(component) = validation_component(container).map(str::to_string) else {
            continue;
        };
        let env = component_env(validator, &component)?;
        let image = match &resolved {
            Some(image) => image.clone(),
            None => resolved.insert(validator_image(ctx)?).clone(),
        };

        container.image = Some(image.clone());
        if let Some(policy) = validator.image_pull_policy() {
            container.image_pull_policy = Some(policy.to_string());
        }
        let security = container.security_context.get_or_insert_with(SecurityContext::default);
        security.privileged = Some(true);
        security.run_as_user = Some(0);

        if matches!(component.as_str(), "cuda" | "plugin") {
            set_env(container, "VALIDATOR_IMAGE", image.as_str());
            if let Some(policy) = validator.image_pull_policy() {
                set_env(container, "VALIDATOR_IMAGE_PULL_POLICY", policy);
            }
            if !validator.image_pull_secrets().is_empty() {
                set_env(container, "VALIDATOR_IMAGE_PULL_SECRETS", validator.image_pull_secrets().join(","));
            }
            if let Some(class) = runtime_class_name(ctx) {
                set_env(container, "VALIDATOR_RUNTIME_CLASS", class);
            }
        }
        apply_env_overrides(container, env);
        wired = true;
    }

    if wired {
        merge_pull_secrets(pod, validator.image_pull_secrets());
    }
    Ok(())
}
