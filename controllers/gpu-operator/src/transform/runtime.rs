//! Container runtime wiring and runtime class selection.

use crate::error::ControllerError;
use crate::transform::TransformContext;
use crate::transform::env::{get_env, set_env};
use crate::transform::pod::{add_mount, add_volume, container_mut, host_path_volume, mount};
use crds::Runtime;
use k8s_openapi::api::core::v1::PodSpec;
use std::path::Path;

/// In-container directory the runtime config file's directory is mounted at
pub const CONFIG_DIR_TARGET: &str = "/runtime/config-dir";
/// In-container directory the runtime socket's directory is mounted at
pub const SOCKET_DIR_TARGET: &str = "/runtime/sock-dir";
/// In-container directory the drop-in config directory is mounted at
pub const DROP_IN_DIR_TARGET: &str = "/runtime/config-dir.d";

/// Host paths of a runtime and the variables that carry them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimePaths {
    pub config_env: &'static str,
    pub default_config: &'static str,
    pub socket_env: &'static str,
    pub default_socket: &'static str,
    /// Drop-in config file, for runtimes that read a config directory
    pub drop_in: Option<&'static str>,
}

pub fn paths(runtime: Runtime) -> RuntimePaths {
    match runtime {
        Runtime::Containerd => RuntimePaths {
            config_env: "CONTAINERD_CONFIG",
            default_config: "/etc/containerd/config.toml",
            socket_env: "CONTAINERD_SOCKET",
            default_socket: "/run/containerd/containerd.sock",
            drop_in: Some("/etc/containerd/conf.d/99-nvidia.toml"),
        },
        Runtime::Crio => RuntimePaths {
            config_env: "CRIO_CONFIG",
            default_config: "/etc/crio/crio.conf",
            socket_env: "CRIO_SOCKET",
            default_socket: "/var/run/crio/crio.sock",
            drop_in: Some("/etc/crio/crio.conf.d/99-nvidia.conf"),
        },
        Runtime::Docker => RuntimePaths {
            config_env: "DOCKER_CONFIG",
            default_config: "/etc/docker/daemon.json",
            socket_env: "DOCKER_SOCKET",
            default_socket: "/var/run/docker.sock",
            drop_in: None,
        },
    }
}

/// Splits an absolute host file path into directory and file name.
fn split_host_path<'a>(path: &'a str, env: &str) -> Result<(&'a str, &'a str), ControllerError> {
    let p = Path::new(path);
    match (p.is_absolute(), p.parent().and_then(Path::to_str), p.file_name().and_then(|f| f.to_str())) {
        (true, Some(dir), Some(file)) => Ok((dir, file)),
        _ => Err(ControllerError::InvalidConfig(format!(
            "{} must be an absolute file path, got {:?}",
            env, path
        ))),
    }
}

/// Mounts the runtime config, socket and drop-in directories into
/// `container_name` and points the path variables at the mounted copies.
/// Host paths come from the container's env when the user overrode them.
pub fn wire_runtime(pod: &mut PodSpec, container_name: &str, ctx: &TransformContext<'_>) -> Result<(), ControllerError> {
    let runtime = ctx.facts.runtime;
    let paths = paths(runtime);
    let container = container_mut(pod, container_name)?;

    let host_config = get_env(container, paths.config_env)
        .unwrap_or(paths.default_config)
        .to_string();
    let host_socket = get_env(container, paths.socket_env)
        .unwrap_or(paths.default_socket)
        .to_string();
    let (config_dir, config_file) = split_host_path(&host_config, paths.config_env)?;
    let (socket_dir, socket_file) = split_host_path(&host_socket, paths.socket_env)?;

    set_env(container, "RUNTIME", runtime.as_str());
    set_env(container, paths.config_env, format!("{}/{}", CONFIG_DIR_TARGET, config_file));
    set_env(container, paths.socket_env, format!("{}/{}", SOCKET_DIR_TARGET, socket_file));
    add_mount(container, mount("runtime-config", CONFIG_DIR_TARGET, false));
    add_mount(container, mount("runtime-socket", SOCKET_DIR_TARGET, false));

    let drop_in = match paths.drop_in {
        Some(default) => {
            let host_drop_in = get_env(container, "RUNTIME_DROP_IN_CONFIG_HOST_PATH")
                .unwrap_or(default)
                .to_string();
            let (dir, file) = split_host_path(&host_drop_in, "RUNTIME_DROP_IN_CONFIG_HOST_PATH")?;
            set_env(container, "RUNTIME_DROP_IN_CONFIG", format!("{}/{}", DROP_IN_DIR_TARGET, file));
            set_env(container, "RUNTIME_DROP_IN_CONFIG_HOST_PATH", host_drop_in.as_str());
            add_mount(container, mount("runtime-drop-in-config", DROP_IN_DIR_TARGET, false));
            Some(dir.to_string())
        }
        None => None,
    };

    add_volume(pod, host_path_volume("runtime-config", config_dir, Some("DirectoryOrCreate")));
    add_volume(pod, host_path_volume("runtime-socket", socket_dir, None));
    if let Some(dir) = drop_in {
        add_volume(pod, host_path_volume("runtime-drop-in-config", &dir, Some("DirectoryOrCreate")));
    }
    Ok(())
}

/// Runtime class for GPU workloads. CRI-O without CDI injects devices via
/// the OCI hook, so no class is set there.
pub fn runtime_class_name(ctx: &TransformContext<'_>) -> Option<String> {
    if ctx.facts.runtime == Runtime::Crio && !ctx.spec.cdi.is_enabled() {
        None
    } else {
        Some(ctx.spec.operator.runtime_class().to_string())
    }
}

pub fn apply_runtime_class(pod: &mut PodSpec, ctx: &TransformContext<'_>) {
    pod.runtime_class_name = runtime_class_name(ctx);
}
