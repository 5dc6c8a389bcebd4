//! DCGM host engine and DCGM exporter DaemonSets.

use crate::error::ControllerError;
use crate::transform::TransformContext;
use crate::transform::env::{set_env, set_env_from_field};
use crate::transform::image::resolve_image;
use crate::transform::pod::{add_mount, add_volume, apply_image_spec, config_map_volume, container_mut, pod_spec_mut};
use crate::transform::runtime::apply_runtime_class;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::VolumeMount;

pub(super) const DCGM_CONTAINER: &str = "nvidia-dcgm-ctr";
pub(super) const EXPORTER_CONTAINER: &str = "nvidia-dcgm-exporter";
const METRICS_FILE: &str = "/etc/dcgm-exporter/dcgm-metrics.csv";

pub fn transform_dcgm(ds: &mut DaemonSet, ctx: &TransformContext<'_>) -> Result<(), ControllerError> {
    let dcgm = &ctx.spec.dcgm;
    let image = resolve_image(&dcgm.image, ctx.config.images.dcgm.as_deref(), "dcgm")?;
    let pod = pod_spec_mut(ds)?;
    apply_image_spec(pod, DCGM_CONTAINER, dcgm, &image)?;

    let port = dcgm.host_port();
    let container = container_mut(pod, DCGM_CONTAINER)?;
    for p in container.ports.iter_mut().flatten().filter(|p| p.name.as_deref() == Some("dcgm")) {
        p.container_port = port;
        p.host_port = Some(port);
    }

    apply_runtime_class(pod, ctx);
    Ok(())
}

/// The exporter talks to the standalone host engine when DCGM is enabled,
/// and embeds its own engine otherwise.
pub fn transform_exporter(ds: &mut DaemonSet, ctx: &TransformContext<'_>) -> Result<(), ControllerError> {
    let exporter = &ctx.spec.dcgm_exporter;
    let image = resolve_image(&exporter.image, ctx.config.images.dcgm_exporter.as_deref(), "dcgm-exporter")?;
    let pod = pod_spec_mut(ds)?;
    apply_image_spec(pod, EXPORTER_CONTAINER, exporter, &image)?;

    let container = container_mut(pod, EXPORTER_CONTAINER)?;
    if ctx.spec.dcgm.is_enabled() {
        set_env_from_field(container, "NODE_IP", "status.hostIP");
        set_env(
            container,
            "DCGM_REMOTE_HOSTENGINE_INFO",
            format!("$(NODE_IP):{}", ctx.spec.dcgm.host_port()),
        );
    }

    if let Some(config_map) = exporter.config.name() {
        set_env(container, "DCGM_EXPORTER_COLLECTORS", METRICS_FILE);
        add_mount(
            container,
            VolumeMount {
                name: "metrics-config".to_string(),
                mount_path: METRICS_FILE.to_string(),
                sub_path: Some("dcgm-metrics.csv".to_string()),
                read_only: Some(true),
                ..Default::default()
            },
        );
        add_volume(pod, config_map_volume("metrics-config", config_map));
    }

    apply_runtime_class(pod, ctx);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::env::get_env;
    use crate::transform::test_support::{config, facts, template};
    use crds::{ClusterPolicySpec, Runtime};
    use k8s_openapi::api::core::v1::PodSpec;

    fn run(state: &str, spec: &ClusterPolicySpec) -> PodSpec {
        let facts = facts(Runtime::Containerd);
        let config = config();
        let ctx = TransformContext::new(spec, &facts, &config);
        let mut ds = template(state);
        if state == "state-dcgm" {
            transform_dcgm(&mut ds, &ctx).unwrap();
        } else {
            transform_exporter(&mut ds, &ctx).unwrap();
        }
        ds.spec.unwrap().template.spec.unwrap()
    }

    #[test]
    fn test_dcgm_host_port() {
        let mut spec = ClusterPolicySpec::default();
        spec.dcgm.host_port = Some(5556);
        let pod = run("state-dcgm", &spec);
        let port = &pod.containers[0].ports.as_ref().unwrap()[0];
        assert_eq!(port.host_port, Some(5556));
        assert_eq!(port.container_port, 5556);
    }

    #[test]
    fn test_exporter_uses_remote_engine() {
        let pod = run("state-dcgm-exporter", &ClusterPolicySpec::default());
        let c = &pod.containers[0];
        assert_eq!(get_env(c, "DCGM_REMOTE_HOSTENGINE_INFO"), Some("$(NODE_IP):5555"));
        assert_eq!(
            get_env(c, "DCGM_EXPORTER_COLLECTORS"),
            Some("/etc/dcgm-exporter/dcp-metrics-included.csv")
        );

        // NODE_IP must precede its use
        let env = c.env.as_ref().unwrap();
        let node_ip = env.iter().position(|e| e.name == "NODE_IP").unwrap();
        let remote = env.iter().position(|e| e.name == "DCGM_REMOTE_HOSTENGINE_INFO").unwrap();
        assert!(node_ip < remote);
    }

    #[test]
    fn test_exporter_standalone_with_metrics_config() {
        let mut spec = ClusterPolicySpec::default();
        spec.dcgm.enabled = Some(false);
        spec.dcgm_exporter.config.name = Some("custom-metrics".to_string());
        let pod = run("state-dcgm-exporter", &spec);

        let c = &pod.containers[0];
        assert_eq!(get_env(c, "DCGM_REMOTE_HOSTENGINE_INFO"), None);
        assert_eq!(get_env(c, "DCGM_EXPORTER_COLLECTORS"), Some(METRICS_FILE));
        let volume = pod.volumes.iter().flatten().find(|v| v.name == "metrics-config").unwrap();
        assert_eq!(volume.config_map.as_ref().unwrap().name, "custom-metrics");
    }
}
