//! Operator configuration loaded from environment variables.

use crate::error::ControllerError;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_OS_RELEASE_PATH: &str = "/host-etc/os-release";
const DEFAULT_RESYNC_SECONDS: u64 = 300;
const DEFAULT_NOT_READY_REQUEUE_SECONDS: u64 = 5;
const DEFAULT_DEBOUNCE_SECONDS: u64 = 2;

/// Fallback image paths, used when a ClusterPolicy leaves the image
/// coordinates of an operand empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageDefaults {
    pub driver: Option<String>,
    pub toolkit: Option<String>,
    pub device_plugin: Option<String>,
    pub dcgm: Option<String>,
    pub dcgm_exporter: Option<String>,
    pub gfd: Option<String>,
    pub mig_manager: Option<String>,
    pub vgpu_manager: Option<String>,
    pub vgpu_device_manager: Option<String>,
    pub cc_manager: Option<String>,
    pub validator: Option<String>,
    pub gds: Option<String>,
    pub driver_toolkit: Option<String>,
}

/// Process-wide configuration, read once at startup and passed explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Namespace every namespaced operand object is deployed into
    pub namespace: String,
    pub os_release_path: PathBuf,
    pub resync_interval: Duration,
    pub not_ready_requeue: Duration,
    pub debounce: Duration,
    pub images: ImageDefaults,
}

impl OperatorConfig {
    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads the configuration through `lookup`, which returns the value of
    /// a variable or `None` when it is unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let namespace = get("OPERATOR_NAMESPACE").ok_or_else(|| {
            ControllerError::InvalidConfig("OPERATOR_NAMESPACE environment variable is required".to_string())
        })?;

        let seconds = |key: &str, default: u64| -> Result<Duration, ControllerError> {
            match get(key) {
                None => Ok(Duration::from_secs(default)),
                Some(raw) => raw.parse::<u64>().map(Duration::from_secs).map_err(|_| {
                    ControllerError::InvalidConfig(format!("{} must be a number of seconds, got {:?}", key, raw))
                }),
            }
        };

        Ok(Self {
            namespace,
            os_release_path: get("HOST_OS_RELEASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OS_RELEASE_PATH)),
            resync_interval: seconds("RESYNC_INTERVAL_SECONDS", DEFAULT_RESYNC_SECONDS)?,
            not_ready_requeue: seconds("NOT_READY_REQUEUE_SECONDS", DEFAULT_NOT_READY_REQUEUE_SECONDS)?,
            debounce: seconds("DEBOUNCE_SECONDS", DEFAULT_DEBOUNCE_SECONDS)?,
            images: ImageDefaults {
                driver: get("DRIVER_IMAGE"),
                toolkit: get("CONTAINER_TOOLKIT_IMAGE"),
                device_plugin: get("DEVICE_PLUGIN_IMAGE"),
                dcgm: get("DCGM_IMAGE"),
                dcgm_exporter: get("DCGM_EXPORTER_IMAGE"),
                gfd: get("GFD_IMAGE"),
                mig_manager: get("MIG_MANAGER_IMAGE"),
                vgpu_manager: get("VGPU_MANAGER_IMAGE"),
                vgpu_device_manager: get("VGPU_DEVICE_MANAGER_IMAGE"),
                cc_manager: get("CC_MANAGER_IMAGE"),
                validator: get("VALIDATOR_IMAGE"),
                gds: get("GDS_IMAGE"),
                driver_toolkit: get("DRIVER_TOOLKIT_IMAGE"),
            },
        })
    }

    /// Minimal configuration for unit tests.
    #[cfg(test)]
    pub fn for_tests(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            os_release_path: PathBuf::from(DEFAULT_OS_RELEASE_PATH),
            resync_interval: Duration::from_secs(DEFAULT_RESYNC_SECONDS),
            not_ready_requeue: Duration::from_secs(DEFAULT_NOT_READY_REQUEUE_SECONDS),
            debounce: Duration::from_secs(DEFAULT_DEBOUNCE_SECONDS),
            images: ImageDefaults::default(),
        }
    }
}
