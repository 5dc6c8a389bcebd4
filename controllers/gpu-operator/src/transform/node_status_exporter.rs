//! Node status exporter DaemonSet. It ships in the validator image.

use crate::error::ControllerError;
use crate::transform::TransformContext;
use crate::transform::image::resolve_image;
use crate::transform::pod::{apply_image_spec, pod_spec_mut};
use k8s_openapi::api::apps::v1::DaemonSet;

pub(super) const EXPORTER_CONTAINER: &str = "nvidia-node-status-exporter";

pub fn transform(ds: &mut DaemonSet, ctx: &TransformContext<'_>) -> Result<(), ControllerError> {
    let exporter = &ctx.spec.node_status_exporter;
    let image = resolve_image(&exporter.image, ctx.config.images.validator.as_deref(), "node-status-exporter")?;
    apply_image_spec(pod_spec_mut(ds)?, EXPORTER_CONTAINER, exporter, &image)
}
