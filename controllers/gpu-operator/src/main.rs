//! GPU Operator
//!
//! Reconciles the `ClusterPolicy` resource into the GPU software stack
//! running on every GPU node: driver, container toolkit, device plugin,
//! DCGM and its exporter, feature discovery, MIG/vGPU/CC managers and the
//! validators gating them.
//!
//! Every pass inspects the cluster (container runtime, kernel versions, OS),
//! renders each operand from its bundled template, fans the driver out per
//! kernel or OS image when needed, and applies the result idempotently.

mod config;
mod controller;
mod error;
mod facts;
mod fingerprint;
mod labeler;
mod reconciler;
mod state;
mod templates;
mod transform;
mod variant;
mod watcher;

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| ControllerError::InvalidConfig("failed to install the rustls crypto provider".to_string()))?;

    info!("Starting GPU Operator");

    let config = OperatorConfig::from_env()?;
    info!("Configuration:");
    info!("  Namespace: {}", config.namespace);
    info!("  Host os-release: {}", config.os_release_path.display());
    info!("  Resync interval: {:?}", config.resync_interval);
    info!("  Not-ready requeue: {:?}", config.not_ready_requeue);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
