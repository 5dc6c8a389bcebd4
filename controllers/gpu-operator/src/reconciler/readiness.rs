//! DaemonSet readiness.
//!
//! A DaemonSet is ready when its controller has observed the current
//! generation and no instance is unavailable or misscheduled. With the
//! `OnDelete` update strategy pods are not rolled automatically, so every
//! running pod must also carry the revision hash of the newest
//! ControllerRevision.

use crate::error::ControllerError;
use cluster_client::{ClusterClientTrait, ObjectKind, Selector, from_dynamic};
use k8s_openapi::api::apps::v1::{ControllerRevision, DaemonSet};
use kube::api::DynamicObject;
use tracing::debug;

pub const REVISION_HASH_LABEL: &str = "controller-revision-hash";

/// Readiness verdict for one DaemonSet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    NotReady(String),
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }
}

/// Readiness from the DaemonSet status alone.
pub fn status_readiness(ds: &DaemonSet) -> Readiness {
    let name = ds.metadata.name.as_deref().unwrap_or_default();
    let Some(status) = ds.status.as_ref() else {
        return Readiness::NotReady(format!("{} has no status yet", name));
    };
    let generation = ds.metadata.generation.unwrap_or(0);
    if status.observed_generation.unwrap_or(0) < generation {
        return Readiness::NotReady(format!("{} rollout of generation {} not observed yet", name, generation));
    }
    if status.desired_number_scheduled == 0 {
        return Readiness::Ready;
    }
    let unavailable = status.number_unavailable.unwrap_or(0);
    if unavailable > 0 {
        return Readiness::NotReady(format!(
            "{}: {} of {} pods unavailable",
            name, unavailable, status.desired_number_scheduled
        ));
    }
    if status.number_misscheduled > 0 {
        return Readiness::NotReady(format!("{}: {} pods misscheduled", name, status.number_misscheduled));
    }
    Readiness::Ready
}

fn is_on_delete(ds: &DaemonSet) -> bool {
    ds.spec
        .as_ref()
        .and_then(|s| s.update_strategy.as_ref())
        .and_then(|u| u.type_.as_deref())
        == Some("OnDelete")
}

fn owned_by(obj: &DynamicObject, name: &str) -> bool {
    obj.metadata
        .owner_references
        .as_ref()
        .is_none_or(|refs| refs.iter().any(|r| r.kind == "DaemonSet" && r.name == name))
}

/// Revision hash of the newest ControllerRevision of the DaemonSet.
async fn latest_revision_hash(
    client: &dyn ClusterClientTrait,
    namespace: &str,
    name: &str,
    selector: &Selector,
) -> Result<Option<String>, ControllerError> {
    let revisions = client.list(ObjectKind::ControllerRevision, Some(namespace), selector).await?;
    let mut latest: Option<ControllerRevision> = None;
    for obj in revisions.iter().filter(|r| owned_by(r, name)) {
        let revision: ControllerRevision = from_dynamic(obj)?;
        if latest.as_ref().is_none_or(|l| revision.revision > l.revision) {
            latest = Some(revision);
        }
    }
    Ok(latest.and_then(|r| r.metadata.labels?.remove(REVISION_HASH_LABEL)))
}

/// Full readiness check, including pod revisions for `OnDelete` DaemonSets.
pub async fn daemonset_readiness(client: &dyn ClusterClientTrait, stored: &DynamicObject) -> Result<Readiness, ControllerError> {
    let ds: DaemonSet = from_dynamic(stored)?;
    let verdict = status_readiness(&ds);
    let desired = ds.status.as_ref().map(|s| s.desired_number_scheduled).unwrap_or(0);
    if !verdict.is_ready() || desired == 0 || !is_on_delete(&ds) {
        return Ok(verdict);
    }

    let name = ds.metadata.name.as_deref().unwrap_or_default();
    let namespace = ds.metadata.namespace.as_deref().unwrap_or_default();
    let Some(match_labels) = ds.spec.as_ref().and_then(|s| s.selector.match_labels.as_ref()) else {
        return Ok(verdict);
    };
    let selector = Selector::from_label_map(match_labels);

    let Some(hash) = latest_revision_hash(client, namespace, name, &selector).await? else {
        return Ok(Readiness::NotReady(format!("{} has no controller revision yet", name)));
    };

    let pods = client.list(ObjectKind::Pod, Some(namespace), &selector).await?;
    let stale = pods
        .iter()
        .filter(|pod| {
            pod.metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(REVISION_HASH_LABEL))
                != Some(&hash)
        })
        .count();
    if stale > 0 {
        debug!("{}: {} pods not on revision {}", name, stale, hash);
        return Ok(Readiness::NotReady(format!("{}: {} pods run an outdated revision", name, stale)));
    }
    Ok(Readiness::Ready)
}
