//! GPU feature discovery DaemonSet.

use crate::error::ControllerError;
use crate::transform::TransformContext;
use crate::transform::env::set_env;
use crate::transform::image::resolve_image;
use crate::transform::pod::{apply_image_spec, container_mut, pod_spec_mut};
use crate::transform::runtime::apply_runtime_class;
use k8s_openapi::api::apps::v1::DaemonSet;

pub(super) const GFD_CONTAINER: &str = "gpu-feature-discovery";

pub fn transform(ds: &mut DaemonSet, ctx: &TransformContext<'_>) -> Result<(), ControllerError> {
    let gfd = &ctx.spec.gfd;
    let image = resolve_image(&gfd.image, ctx.config.images.gfd.as_deref(), "gpu-feature-discovery")?;
    let pod = pod_spec_mut(ds)?;
    apply_image_spec(pod, GFD_CONTAINER, gfd, &image)?;
    set_env(container_mut(pod, GFD_CONTAINER)?, "MIG_STRATEGY", ctx.spec.mig.strategy.as_str());
    apply_runtime_class(pod, ctx);
    Ok(())
}
