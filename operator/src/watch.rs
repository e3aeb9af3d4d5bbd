//! Maps changes on secondary objects back to `MLflow` reconcile requests.

use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::Resource;
use kube::ResourceExt;
use kube_runtime::reflector::ObjectRef;

use crate::crd::MLflow;

fn is_mlflow(reference: &OwnerReference) -> bool {
    reference.kind == MLflow::kind(&()) && reference.api_version == MLflow::api_version(&())
}

/// The controlling `MLflow` of a child object, if any. Instances are
/// cluster-scoped, so the request carries no namespace.
pub fn controller_owner_request(meta: &ObjectMeta) -> Option<ObjectRef<MLflow>> {
    meta.owner_references
        .as_deref()?
        .iter()
        .find(|r| r.controller == Some(true) && is_mlflow(r))
        .map(|r| ObjectRef::new(&r.name))
}

/// Every `MLflow` listed as an owner of a shared object.
pub fn shared_owner_requests(meta: &ObjectMeta) -> Vec<ObjectRef<MLflow>> {
    meta.owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .filter(|r| is_mlflow(r))
        .map(|r| ObjectRef::new(&r.name))
        .collect()
}

/// Every known instance. Used when a change can affect all of them.
pub fn all_instance_requests(instances: &[Arc<MLflow>]) -> Vec<ObjectRef<MLflow>> {
    instances
        .iter()
        .map(|m| ObjectRef::new(&m.name_any()))
        .collect()
}
