//! In-memory cluster for driving whole reconcile passes in tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStatus};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use kube::api::{DynamicObject, ObjectMeta};

use crate::client::ClusterOps;
use crate::crd::{MLflow, MLflowStatus};
use crate::error::Error;
use crate::event::EventKind;
use crate::object::RenderedObject;

type ObjectKey = (String, Option<String>, String);

#[derive(Default)]
struct State {
    mlflows: BTreeMap<String, MLflow>,
    objects: BTreeMap<ObjectKey, DynamicObject>,
    deployments: BTreeMap<(String, String), Deployment>,
    config_maps: BTreeMap<(String, String), ConfigMap>,
    kinds: BTreeMap<String, Vec<String>>,
    applied: Vec<String>,
    events: Vec<(EventKind, String)>,
    fail_apply_kind: Option<String>,
    racing_owner: Option<(String, OwnerReference)>,
    status_conflicts: u32,
    version: u64,
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

/// Objects are stored as applied; resource versions are bumped on every write
/// and a pinned version that no longer matches is rejected as a conflict.
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

fn key(object: &RenderedObject) -> ObjectKey {
    (object.kind().to_string(), object.namespace(), object.name())
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_mlflow(&self, mut mlflow: MLflow) {
        let mut state = self.state.lock().unwrap();
        mlflow.metadata.resource_version = Some(state.next_version());
        if mlflow.metadata.uid.is_none() {
            mlflow.metadata.uid = Some(format!("uid-{}", mlflow.name_any()));
        }
        state.mlflows.insert(mlflow.name_any(), mlflow);
    }

    pub fn mlflow(&self, name: &str) -> Option<MLflow> {
        self.state.lock().unwrap().mlflows.get(name).cloned()
    }

    pub fn set_deployment(&self, name: &str, namespace: &str, replicas: i32, ready: i32) {
        let deployment = Deployment {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some(namespace.into()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                ..Default::default()
            }),
            status: Some(DeploymentStatus {
                ready_replicas: Some(ready),
                ..Default::default()
            }),
        };
        self.state
            .lock()
            .unwrap()
            .deployments
            .insert((namespace.into(), name.into()), deployment);
    }

    pub fn add_config_map(&self, name: &str, namespace: &str, data: &[(&str, &str)]) {
        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some(namespace.into()),
                ..Default::default()
            },
            data: Some(
                data.iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        };
        self.state
            .lock()
            .unwrap()
            .config_maps
            .insert((namespace.into(), name.into()), config_map);
    }

    pub fn serve_kinds(&self, group_version: &str, kinds: &[&str]) {
        self.state.lock().unwrap().kinds.insert(
            group_version.into(),
            kinds.iter().map(|k| k.to_string()).collect(),
        );
    }

    pub fn fail_apply_of(&self, kind: &str) {
        self.state.lock().unwrap().fail_apply_kind = Some(kind.into());
    }

    /// The next read of a `kind` object returns the current copy, then another
    /// writer adds `owner` to the stored one and bumps its version.
    pub fn race_owner_after_read(&self, kind: &str, owner: OwnerReference) {
        self.state.lock().unwrap().racing_owner = Some((kind.into(), owner));
    }

    /// Reject the next `n` status writes with a conflict.
    pub fn conflict_status_writes(&self, n: u32) {
        self.state.lock().unwrap().status_conflicts = n;
    }

    pub fn object(&self, kind: &str, namespace: Option<&str>, name: &str) -> Option<DynamicObject> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&(kind.into(), namespace.map(String::from), name.into()))
            .cloned()
    }

    /// `Kind/name` of every successful apply, in order.
    pub fn applied(&self) -> Vec<String> {
        self.state.lock().unwrap().applied.clone()
    }

    pub fn events(&self) -> Vec<(EventKind, String)> {
        self.state.lock().unwrap().events.clone()
    }
}

#[async_trait]
impl ClusterOps for FakeCluster {
    async fn get_mlflow(&self, name: &str) -> Result<Option<MLflow>, Error> {
        Ok(self.mlflow(name))
    }

    async fn patch_mlflow_status(
        &self,
        name: &str,
        resource_version: Option<String>,
        status: &MLflowStatus,
    ) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        if state.status_conflicts > 0 {
            state.status_conflicts -= 1;
            return Err(Error::Conflict(format!("mlflows/{name}")));
        }
        let version = state.next_version();
        let mlflow = state
            .mlflows
            .get_mut(name)
            .ok_or_else(|| Error::Gone(name.into()))?;
        if resource_version.is_some() && resource_version != mlflow.metadata.resource_version {
            return Err(Error::Conflict(format!("mlflows/{name}")));
        }
        mlflow.status = Some(status.clone());
        mlflow.metadata.resource_version = Some(version);
        Ok(())
    }

    async fn get_object(&self, object: &RenderedObject) -> Result<Option<DynamicObject>, Error> {
        let mut state = self.state.lock().unwrap();
        let k = key(object);
        let current = state.objects.get(&k).cloned();
        let racing = matches!(&state.racing_owner, Some((kind, _)) if kind == object.kind());
        if current.is_some() && racing {
            let version = state.next_version();
            let owner = state.racing_owner.take().map(|(_, owner)| owner);
            if let Some(stored) = state.objects.get_mut(&k) {
                stored.metadata.owner_references.get_or_insert_with(Vec::new).extend(owner);
                stored.metadata.resource_version = Some(version);
            }
        }
        Ok(current)
    }

    async fn apply_object(&self, object: &RenderedObject) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        if state.fail_apply_kind.as_deref() == Some(object.kind()) {
            return Err(Error::Timeout(format!("apply {}", object.display_ref())));
        }
        let k = key(object);
        if let Some(pinned) = object.resource_version() {
            let live = state.objects.get(&k).and_then(|o| o.metadata.resource_version.as_deref());
            if live != Some(pinned) {
                return Err(Error::Conflict(object.display_ref()));
            }
        }
        let mut stored = object.as_dynamic().clone();
        stored.metadata.resource_version = Some(state.next_version());
        state.objects.insert(k, stored);
        state.applied.push(object.display_ref());
        Ok(())
    }

    async fn get_deployment(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Deployment>, Error> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .deployments
            .get(&(namespace.into(), name.into()))
            .cloned())
    }

    async fn get_config_map(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ConfigMap>, Error> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .config_maps
            .get(&(namespace.into(), name.into()))
            .cloned())
    }

    async fn api_resource_kinds(
        &self,
        group_version: &str,
    ) -> Result<Option<Vec<String>>, Error> {
        Ok(self.state.lock().unwrap().kinds.get(group_version).cloned())
    }

    async fn publish_event(&self, _mlflow: &MLflow, kind: EventKind, reason: &str, _note: &str) {
        self.state.lock().unwrap().events.push((kind, reason.into()));
    }
}
