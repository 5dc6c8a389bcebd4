//! Idempotent create-or-update of one object.

use crate::error::ControllerError;
use crate::fingerprint::{annotate, stored_fingerprint};
use cluster_client::{ClusterClientTrait, ObjectKind};
use kube::api::DynamicObject;
use tracing::{debug, info};

/// What `apply_object` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Creates `desired` or brings the stored object in line with it.
///
/// The desired object is annotated with its fingerprint. An existing object
/// carrying the same fingerprint is left alone; otherwise it is replaced
/// using the stored `resourceVersion`, so a concurrent writer makes the
/// update fail with a conflict instead of being overwritten. Returns the
/// object as stored.
pub async fn apply_object(
    client: &dyn ClusterClientTrait,
    kind: ObjectKind,
    mut desired: DynamicObject,
) -> Result<(ApplyOutcome, DynamicObject), ControllerError> {
    let hash = annotate(&mut desired)?;
    let name = desired.metadata.name.clone().unwrap_or_default();
    let namespace = desired.metadata.namespace.clone();

    let current = match client.get(kind, namespace.as_deref(), &name).await {
        Ok(current) => current,
        Err(e) if e.is_not_found() => {
            let created = client.create(kind, &desired).await?;
            info!("Created {} {}", kind, name);
            return Ok((ApplyOutcome::Created, created));
        }
        Err(e) => return Err(e.into()),
    };

    if stored_fingerprint(&current) == Some(hash.as_str()) {
        debug!("{} {} is up to date", kind, name);
        return Ok((ApplyOutcome::Unchanged, current));
    }

    desired.metadata.resource_version = current.metadata.resource_version.clone();
    let updated = client.update(kind, &desired).await?;
    info!("Updated {} {}", kind, name);
    Ok((ApplyOutcome::Updated, updated))
}

/// Deletes an object; a missing object counts as deleted.
pub async fn delete_object(
    client: &dyn ClusterClientTrait,
    kind: ObjectKind,
    namespace: Option<&str>,
    name: &str,
) -> Result<bool, ControllerError> {
    match client.delete(kind, namespace, name).await {
        Ok(()) => {
            info!("Deleted {} {}", kind, name);
            Ok(true)
        }
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e.into()),
    }
}
