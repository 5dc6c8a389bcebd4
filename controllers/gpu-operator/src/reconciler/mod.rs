//! Reconciliation of a ClusterPolicy into operand objects.
//!
//! One pass walks every operand state in declaration order:
//! - a disabled state has its objects deleted and reports `Disabled`
//! - an enabled state checks its ConfigMap references, builds every object
//!   (transform plus variant expansion), prunes stale DaemonSet variants,
//!   applies the objects in order and finally checks DaemonSet readiness
//!
//! A failing state only marks itself `NotReady`; the remaining states are
//! still reconciled. Nothing is cached between passes.

pub mod apply;
pub mod readiness;


use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::facts;
use crate::labeler;
use crate::state::{PassReport, StateResult};
use crate::templates::{OperandObject, StateTemplate, TemplateRegistry};
use crate::transform::{OperandKind, TransformContext, transform_daemonset, transform_object};
use crate::variant::{self, VARIANT_OF_LABEL, VariantAxis};
use apply::{apply_object, delete_object};
use cluster_client::{ClusterClientTrait, ObjectKind, Selector};
use crds::ClusterPolicy;
use k8s_openapi::api::apps::v1::DaemonSet;
use kube::Resource;
use readiness::{Readiness, daemonset_readiness};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Objects built for one state, in apply order.
enum Planned {
    Object(OperandObject),
    /// All instances of one template DaemonSet
    DaemonSets {
        base: String,
        axis: Option<VariantAxis>,
        instances: Vec<DaemonSet>,
    },
}

/// Reconciles ClusterPolicies against the cluster.
pub struct Reconciler {
    client: Arc<dyn ClusterClientTrait>,
    config: Arc<OperatorConfig>,
    templates: Arc<TemplateRegistry>,
}

impl Reconciler {
    pub fn new(client: Arc<dyn ClusterClientTrait>, config: Arc<OperatorConfig>, templates: Arc<TemplateRegistry>) -> Self {
        Self {
            client,
            config,
            templates,
        }
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    /// Runs one pass for `policy`.
    ///
    /// Errors are returned only when the pass could not start (facts
    /// unavailable); per-state failures are part of the report.
    pub async fn reconcile(&self, policy: &ClusterPolicy) -> Result<PassReport, ControllerError> {
        let name = policy.metadata.name.as_deref().unwrap_or_default();
        info!("Reconciling ClusterPolicy {}", name);

        if let Err(e) = labeler::label_gpu_nodes(self.client.as_ref()).await {
            warn!("Failed to label GPU nodes: {}", e);
        }
        let facts = facts::gather(self.client.as_ref(), &self.config, policy.spec.operator.default_runtime).await?;

        let owner = policy.controller_owner_ref(&());
        let ctx = TransformContext::new(&policy.spec, &facts, &self.config).with_owner(owner.as_ref());

        let mut report = PassReport::default();
        for state in self.templates.states() {
            let result = self.reconcile_state(state, &ctx).await;
            debug!("State {}: {:?}", result.name, result.state);
            report.push(result);
        }

        info!("ClusterPolicy {} is {:?}", name, report.aggregate());
        Ok(report)
    }

    async fn reconcile_state(&self, state: &StateTemplate, ctx: &TransformContext<'_>) -> StateResult {
        let enabled = match state.operand {
            Some(operand) => operand.is_enabled(ctx.spec),
            // Shared prerequisites stay while any operand needs them
            None => OperandKind::ALL.iter().any(|operand| operand.is_enabled(ctx.spec)),
        };
        if !enabled {
            return match self.delete_state(state, ctx).await {
                Ok(()) => StateResult::disabled(state.name),
                Err(e) => {
                    warn!("Failed to remove disabled state {}: {}", state.name, e);
                    StateResult::failed(state.name, &e)
                }
            };
        }

        match self.apply_state(state, ctx).await {
            Ok(Readiness::Ready) => StateResult::ready(state.name),
            Ok(Readiness::NotReady(reason)) => {
                info!("State {} not ready: {}", state.name, reason);
                StateResult::not_ready(state.name, reason)
            }
            Err(e) => {
                if e.is_retryable() {
                    warn!("State {} failed: {}", state.name, e);
                } else {
                    error!("State {} has a configuration error: {}", state.name, e);
                }
                StateResult::failed(state.name, &e)
            }
        }
    }

    async fn apply_state(&self, state: &StateTemplate, ctx: &TransformContext<'_>) -> Result<Readiness, ControllerError> {
        if let Some(operand) = state.operand {
            self.check_config_references(&operand.config_references(ctx.spec)).await?;
        }

        // Build everything first so a configuration error aborts the state
        // before anything is written.
        let planned = build_state(state, ctx)?;
        let namespace = self.config.namespace.as_str();

        for item in &planned {
            if let Planned::DaemonSets { base, axis, .. } = item {
                variant::prune_stale(self.client.as_ref(), namespace, base, *axis, ctx.facts).await?;
            }
        }

        let mut waiting = Vec::new();
        for item in planned {
            match item {
                Planned::Object(obj) => {
                    apply_object(self.client.as_ref(), obj.kind(), obj.to_dynamic()?).await?;
                }
                Planned::DaemonSets { instances, .. } => {
                    for ds in instances {
                        let desired = cluster_client::to_dynamic(&ds)?;
                        let (_, stored) = apply_object(self.client.as_ref(), ObjectKind::DaemonSet, desired).await?;
                        if let Readiness::NotReady(reason) = daemonset_readiness(self.client.as_ref(), &stored).await? {
                            waiting.push(reason);
                        }
                    }
                }
            }
        }

        if waiting.is_empty() {
            Ok(Readiness::Ready)
        } else {
            Ok(Readiness::NotReady(waiting.join("; ")))
        }
    }

    async fn check_config_references(&self, names: &[String]) -> Result<(), ControllerError> {
        for name in names {
            match self
                .client
                .get(ObjectKind::ConfigMap, Some(&self.config.namespace), name)
                .await
            {
                Ok(_) => {}
                Err(e) if e.is_not_found() => return Err(ControllerError::MissingConfigReference(name.clone())),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Deletes the objects of a state, workloads first.
    async fn delete_state(&self, state: &StateTemplate, ctx: &TransformContext<'_>) -> Result<(), ControllerError> {
        let namespace = self.config.namespace.as_str();
        for obj in state.objects.iter().rev() {
            let kind = obj.kind();
            if kind == ObjectKind::DaemonSet {
                let selector = Selector::labels(format!("{}={}", VARIANT_OF_LABEL, obj.name()));
                for instance in self.client.list(kind, Some(namespace), &selector).await? {
                    let name = instance.metadata.name.unwrap_or_default();
                    delete_object(self.client.as_ref(), kind, Some(namespace), &name).await?;
                }
                continue;
            }
            let name = match obj {
                OperandObject::RuntimeClass(_) => ctx.spec.operator.runtime_class(),
                _ => obj.name(),
            };
            let ns = kind.is_namespaced().then_some(namespace);
            delete_object(self.client.as_ref(), kind, ns, name).await?;
        }
        Ok(())
    }
}

/// Transforms every object of a state.
fn build_state(state: &StateTemplate, ctx: &TransformContext<'_>) -> Result<Vec<Planned>, ControllerError> {
    let mut planned = Vec::with_capacity(state.objects.len());
    for obj in &state.objects {
        let OperandObject::DaemonSet(template) = obj else {
            planned.push(Planned::Object(transform_object(obj, ctx)?));
            continue;
        };
        let axis = state
            .operand
            .and_then(|operand| variant::select_axis(operand, ctx.spec, ctx.facts));
        let instances = variant::expand(axis, ctx.facts, |selected| {
            transform_daemonset(template, &ctx.with_variant(selected))
        })?;
        planned.push(Planned::DaemonSets {
            base: obj.name().to_string(),
            axis,
            instances,
        });
    }
    Ok(planned)
}
