//! Owner references from rendered objects back to their `MLflow`.
//!
//! Namespaced children get one exclusive controller reference. The shared
//! ClusterRole accumulates one plain reference per instance instead, merged
//! against the live copy so concurrent instances never drop each other.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use tracing::debug;

use crate::client::ClusterOps;
use crate::crd::MLflow;
use crate::error::Error;
use crate::object::RenderedObject;

/// Reference to `mlflow`, flagged as controller or not.
pub fn owner_reference(mlflow: &MLflow, controller: bool) -> Result<OwnerReference, Error> {
    let mut reference = mlflow
        .controller_owner_ref(&())
        .ok_or_else(|| Error::MissingUid(mlflow.name_any()))?;
    if !controller {
        reference.controller = None;
        reference.block_owner_deletion = None;
    }
    Ok(reference)
}

/// Make `mlflow` the controller of `object`.
///
/// Fails when another controller already owns it. Non-controller references
/// on the object are kept.
pub fn set_controller_owner(mlflow: &MLflow, object: &mut RenderedObject) -> Result<(), Error> {
    let owner = owner_reference(mlflow, true)?;

    if let Some(existing) = object
        .owner_references()
        .iter()
        .find(|r| r.controller == Some(true) && r.uid != owner.uid)
    {
        return Err(Error::AlreadyOwned {
            kind: object.kind().to_string(),
            name: object.name(),
            owner: format!("{}/{}", existing.kind, existing.name),
        });
    }

    let mut refs: Vec<OwnerReference> = object
        .owner_references()
        .iter()
        .filter(|r| r.uid != owner.uid)
        .cloned()
        .collect();
    refs.push(owner);
    object.set_owner_references(refs);
    Ok(())
}

/// Add `mlflow` as a non-controller owner of a shared object.
///
/// The reference list is taken from the live object, not from `object`, so a
/// concurrent reconcile of another instance is never overwritten. The write is
/// pinned to the live resource version; a race surfaces as a conflict on
/// apply. Appending the same owner twice is a no-op.
///
/// When the object does not exist yet the create is not pinned, so two
/// instances creating it at the same moment can both apply a single owner and
/// the later one wins until the next pass of the other re-appends itself.
pub async fn append_owner(
    cluster: &dyn ClusterOps,
    mlflow: &MLflow,
    object: &mut RenderedObject,
) -> Result<(), Error> {
    let owner = owner_reference(mlflow, false)?;

    let Some(live) = cluster.get_object(object).await? else {
        object.set_owner_references(vec![owner]);
        return Ok(());
    };

    object.set_resource_version(live.metadata.resource_version);
    let mut refs = live.metadata.owner_references.unwrap_or_default();
    if refs.iter().any(|r| r.uid == owner.uid) {
        debug!(object = %object.display_ref(), "owner already present");
    } else {
        refs.push(owner);
    }
    object.set_owner_references(refs);
    Ok(())
}
