//! Main controller implementation.
//!
//! Builds the reconciler (cluster client, bundled templates, configuration)
//! and runs the ClusterPolicy watcher in a background task.

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::templates::TemplateRegistry;
use crate::watcher::Watcher;
use cluster_client::KubeClusterClient;
use kube::Client;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Main controller for the GPU software stack.
pub struct Controller {
    policy_watcher: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts watching.
    pub async fn new(config: OperatorConfig) -> Result<Self, ControllerError> {
        info!("Initializing GPU Operator controller");

        let kube_client = Client::try_default().await?;
        let templates = TemplateRegistry::load()?;
        info!("Loaded {} operand states", templates.states().len());

        let reconciler = Arc::new(Reconciler::new(
            Arc::new(KubeClusterClient::new(kube_client.clone())),
            Arc::new(config),
            Arc::new(templates),
        ));

        let watcher = Watcher::new(kube_client, reconciler);
        let policy_watcher = tokio::spawn(async move { watcher.watch_cluster_policies().await });

        Ok(Self { policy_watcher })
    }

    /// Runs the controller until shutdown.
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("GPU Operator controller running");
        self.policy_watcher
            .await
            .map_err(|e| ControllerError::Watch(format!("ClusterPolicy watcher panicked: {}", e)))??;
        info!("GPU Operator controller stopped");
        Ok(())
    }
}
