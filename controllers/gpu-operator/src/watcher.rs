//! Kubernetes resource watchers.
//!
//! ClusterPolicy is the primary resource. Owned DaemonSets and Nodes also
//! trigger passes: DaemonSet status drives readiness, and node changes add
//! or remove kernel variants. Every node event maps onto every ClusterPolicy
//! in the reflector store; the singleton check then ignores all but the
//! active one.
//!
//! The controller runs with concurrency 1 and a debounce so bursts of events
//! collapse into a single pass and passes never overlap.

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::state::PassReport;
use crds::{ClusterPolicy, ClusterPolicyStatus, PolicyState};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Patch, PatchParams};
use kube::{Api, ResourceExt};
use kube_runtime::reflector::{ObjectRef, Store};
use kube_runtime::{
    Controller, watcher,
    controller::{Action, Config as ControllerConfig},
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Shared state of the reconcile and error-policy callbacks.
struct Context {
    reconciler: Arc<Reconciler>,
    policies: Api<ClusterPolicy>,
    store: Store<ClusterPolicy>,
}

/// Name of the ClusterPolicy that is reconciled: the oldest one, ties
/// broken by name.
pub fn active_policy_name(policies: &[Arc<ClusterPolicy>]) -> Option<String> {
    policies
        .iter()
        .min_by(|a, b| {
            a.metadata
                .creation_timestamp
                .cmp(&b.metadata.creation_timestamp)
                .then_with(|| a.name_any().cmp(&b.name_any()))
        })
        .map(|p| p.name_any())
}

/// Delay before the next pass after `report`.
///
/// Only a policy change fixes a configuration error, so those wait for the
/// resync interval like a healthy cluster does.
pub fn requeue_after(report: &PassReport, config: &OperatorConfig) -> Duration {
    match report.aggregate() {
        PolicyState::NotReady if !report.has_config_error() => config.not_ready_requeue,
        _ => config.resync_interval,
    }
}

async fn patch_status(ctx: &Context, policy: &ClusterPolicy, status: ClusterPolicyStatus) -> Result<(), ControllerError> {
    if policy.status.as_ref().is_some_and(|current| current.same_outcome(&status)) {
        return Ok(());
    }
    let name = policy.name_any();
    debug!("Updating status of ClusterPolicy {} to {:?}", name, status.state);
    ctx.policies
        .patch_status(&name, &PatchParams::default(), &Patch::Merge(json!({ "status": status })))
        .await?;
    Ok(())
}

async fn reconcile(policy: Arc<ClusterPolicy>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let name = policy.name_any();
    let config = ctx.reconciler.config();

    let mut candidates = ctx.store.state();
    if !candidates.iter().any(|p| p.name_any() == name) {
        candidates.push(policy.clone());
    }
    if let Some(active) = active_policy_name(&candidates).filter(|active| *active != name) {
        info!("Ignoring ClusterPolicy {}: {} is already active", name, active);
        let status = ClusterPolicyStatus {
            state: PolicyState::Ignored,
            namespace: Some(config.namespace.clone()),
            ..Default::default()
        };
        patch_status(&ctx, &policy, status).await?;
        return Ok(Action::await_change());
    }

    let report = ctx.reconciler.reconcile(&policy).await?;
    patch_status(&ctx, &policy, report.to_status(&config.namespace)).await?;
    Ok(Action::requeue(requeue_after(&report, config)))
}

fn error_policy(policy: Arc<ClusterPolicy>, err: &ControllerError, ctx: Arc<Context>) -> Action {
    error!("Reconciliation of ClusterPolicy {} failed: {}", policy.name_any(), err);
    let config = ctx.reconciler.config();
    if err.is_retryable() {
        Action::requeue(config.not_ready_requeue)
    } else {
        Action::requeue(config.resync_interval)
    }
}

/// Watches ClusterPolicies and the resources feeding them.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    policies: Api<ClusterPolicy>,
    daemonsets: Api<DaemonSet>,
    nodes: Api<Node>,
}

impl Watcher {
    pub fn new(client: kube::Client, reconciler: Arc<Reconciler>) -> Self {
        let namespace = reconciler.config().namespace.clone();
        Self {
            reconciler,
            policies: Api::all(client.clone()),
            daemonsets: Api::namespaced(client.clone(), &namespace),
            nodes: Api::all(client),
        }
    }

    /// Runs the controller until shutdown (SIGTERM or Ctrl-C).
    pub async fn watch_cluster_policies(&self) -> Result<(), ControllerError> {
        info!("Starting ClusterPolicy watcher");

        let controller = Controller::new(self.policies.clone(), watcher::Config::default());
        let store = controller.store();
        let node_store = store.clone();
        let ctx = Arc::new(Context {
            reconciler: self.reconciler.clone(),
            policies: self.policies.clone(),
            store,
        });

        let controller_config = ControllerConfig::default()
            .debounce(self.reconciler.config().debounce)
            .concurrency(1);

        controller
            .owns(self.daemonsets.clone(), watcher::Config::default())
            .watches(self.nodes.clone(), watcher::Config::default(), move |_node: Node| {
                node_store
                    .state()
                    .into_iter()
                    .map(|policy| ObjectRef::from_obj(&*policy))
                    .collect::<Vec<_>>()
            })
            .with_config(controller_config)
            .shutdown_on_signal()
            .run(reconcile, error_policy, ctx)
            .for_each(|res| async move {
                match res {
                    Ok((policy, _)) => debug!("Reconciled ClusterPolicy {}", policy.name),
                    Err(e) => error!("ClusterPolicy controller error: {}", e),
                }
            })
            .await;

        info!("ClusterPolicy watcher stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateResult;

    fn policy(name: &str, created: Option<&str>) -> Arc<ClusterPolicy> {
        let mut metadata = json!({ "name": name });
        if let Some(created) = created {
            metadata["creationTimestamp"] = json!(created);
        }
        Arc::new(
            serde_json::from_value(json!({
                "apiVersion": "gpuops.microscaler.io/v1alpha1",
                "kind": "ClusterPolicy",
                "metadata": metadata,
                "spec": {}
            }))
            .unwrap(),
        )
    }

    #[test]
    fn test_oldest_policy_is_active() {
        let policies = vec![
            policy("b-policy", Some("2024-03-01T10:00:00Z")),
            policy("a-policy", Some("2024-05-01T10:00:00Z")),
        ];
        assert_eq!(active_policy_name(&policies).as_deref(), Some("b-policy"));
    }

    #[test]
    fn test_name_breaks_ties() {
        let policies = vec![
            policy("gpu-cluster-policy", Some("2024-03-01T10:00:00Z")),
            policy("cluster-policy", Some("2024-03-01T10:00:00Z")),
        ];
        assert_eq!(active_policy_name(&policies).as_deref(), Some("cluster-policy"));
        assert_eq!(active_policy_name(&[]), None);
    }

    #[test]
    fn test_requeue_after() {
        let config = OperatorConfig::for_tests("gpu-operator");
        let ready = PassReport {
            states: vec![StateResult::ready("pre-requisites")],
        };
        assert_eq!(requeue_after(&ready, &config), config.resync_interval);

        let waiting = PassReport {
            states: vec![StateResult::not_ready("state-driver", "1 of 2 pods unavailable")],
        };
        assert_eq!(requeue_after(&waiting, &config), config.not_ready_requeue);

        let broken = PassReport {
            states: vec![StateResult::failed(
                "state-driver",
                &ControllerError::InvalidConfig("no driver image".to_string()),
            )],
        };
        assert_eq!(requeue_after(&broken, &config), config.resync_interval);
    }
}
