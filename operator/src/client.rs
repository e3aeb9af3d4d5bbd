//! Cluster API boundary.
//!
//! Everything the reconciler needs from the API server goes through
//! [`ClusterOps`], so the engine can be driven by an in-memory cluster in
//! tests. Not-found is `Ok(None)`, never an error.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, DynamicObject, Patch, PatchParams};
use kube::{Client, Resource};
use kube_runtime::events::{Event, Recorder};
use serde_json::json;
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use crate::crd::{MLflow, MLflowStatus};
use crate::error::Error;
use crate::event::{EventKind, make_reporter};
use crate::naming::FIELD_MANAGER;
use crate::object::RenderedObject;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterOps: Send + Sync {
    async fn get_mlflow(&self, name: &str) -> Result<Option<MLflow>, Error>;

    /// Merge-patch the status subresource. With a resource version the write
    /// is rejected with a conflict when the object changed in between.
    async fn patch_mlflow_status(
        &self,
        name: &str,
        resource_version: Option<String>,
        status: &MLflowStatus,
    ) -> Result<(), Error>;

    /// Live copy of the object with the same kind, name and namespace.
    async fn get_object(&self, object: &RenderedObject) -> Result<Option<DynamicObject>, Error>;

    /// Server-side apply under the operator's field manager, forcing conflicts.
    async fn apply_object(&self, object: &RenderedObject) -> Result<(), Error>;

    async fn get_deployment(&self, name: &str, namespace: &str)
    -> Result<Option<Deployment>, Error>;

    async fn get_config_map(&self, name: &str, namespace: &str)
    -> Result<Option<ConfigMap>, Error>;

    /// Kinds served under `group_version`, or `None` when the group/version
    /// is not registered or its discovery endpoint is unavailable.
    async fn api_resource_kinds(&self, group_version: &str)
    -> Result<Option<Vec<String>>, Error>;

    /// Best effort. Failures are logged, never returned.
    async fn publish_event(&self, mlflow: &MLflow, kind: EventKind, reason: &str, note: &str);
}

/// [`ClusterOps`] backed by a live API server.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    recorder: Recorder,
    timeout: Duration,
}

impl KubeCluster {
    pub fn new(client: Client, timeout: Duration) -> Self {
        let recorder = Recorder::new(client.clone(), make_reporter());
        Self {
            client,
            recorder,
            timeout,
        }
    }

    fn dynamic_api(&self, object: &RenderedObject) -> Api<DynamicObject> {
        let ar = object.api_resource();
        match object.namespace() {
            Some(ns) => Api::namespaced_with(self.client.clone(), &ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }

    async fn bounded<T, F>(&self, operation: &str, fut: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, kube::Error>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(|e| classify(operation, e)),
            Err(_) => Err(Error::Timeout(operation.to_string())),
        }
    }
}

fn classify(operation: &str, e: kube::Error) -> Error {
    match &e {
        kube::Error::Api(ae) if ae.code == 409 => {
            Error::Conflict(format!("{operation}: {}", ae.message))
        }
        _ => Error::Kube(e),
    }
}

#[async_trait]
impl ClusterOps for KubeCluster {
    async fn get_mlflow(&self, name: &str) -> Result<Option<MLflow>, Error> {
        let api: Api<MLflow> = Api::all(self.client.clone());
        self.bounded("get mlflow", api.get_opt(name)).await
    }

    async fn patch_mlflow_status(
        &self,
        name: &str,
        resource_version: Option<String>,
        status: &MLflowStatus,
    ) -> Result<(), Error> {
        let api: Api<MLflow> = Api::all(self.client.clone());
        let patch = json!({
            "metadata": {"resourceVersion": resource_version},
            "status": status,
        });
        self.bounded(
            "patch mlflow status",
            api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch)),
        )
        .await?;
        Ok(())
    }

    async fn get_object(&self, object: &RenderedObject) -> Result<Option<DynamicObject>, Error> {
        let api = self.dynamic_api(object);
        let name = object.name();
        self.bounded("get object", api.get_opt(&name)).await
    }

    async fn apply_object(&self, object: &RenderedObject) -> Result<(), Error> {
        let api = self.dynamic_api(object);
        let name = object.name();
        let params = PatchParams::apply(FIELD_MANAGER).force();
        self.bounded(
            "apply object",
            api.patch(&name, &params, &Patch::Apply(object.as_dynamic())),
        )
        .await?;
        debug!(kind = object.kind(), name = %name, "applied");
        Ok(())
    }

    async fn get_deployment(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Deployment>, Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        self.bounded("get deployment", api.get_opt(name)).await
    }

    async fn get_config_map(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ConfigMap>, Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        self.bounded("get configmap", api.get_opt(name)).await
    }

    async fn api_resource_kinds(
        &self,
        group_version: &str,
    ) -> Result<Option<Vec<String>>, Error> {
        let fut = self.client.list_api_group_resources(group_version);
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(list)) => Ok(Some(list.resources.into_iter().map(|r| r.kind).collect())),
            Ok(Err(kube::Error::Api(ae))) if ae.code == 404 || ae.code == 503 => {
                debug!(group_version, code = ae.code, "group/version not served");
                Ok(None)
            }
            Ok(Err(e)) => Err(classify("discovery", e)),
            Err(_) => Err(Error::Timeout("discovery".into())),
        }
    }

    async fn publish_event(&self, mlflow: &MLflow, kind: EventKind, reason: &str, note: &str) {
        let event = Event {
            type_: kind.into(),
            reason: reason.into(),
            note: Some(note.into()),
            action: "Reconcile".into(),
            secondary: None,
        };
        let reference = mlflow.object_ref(&());
        if let Err(e) = self.recorder.publish(&event, &reference).await {
            warn!(reason, error = %e, "failed to publish event");
        }
    }
}
