//! Typed access to rendered, otherwise untyped, Kubernetes objects.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use kube::ResourceExt;

/// One object produced by the renderer, ready to be owned and applied.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedObject {
    inner: DynamicObject,
}

impl RenderedObject {
    pub fn new(inner: DynamicObject) -> Self {
        Self { inner }
    }

    pub fn api_version(&self) -> &str {
        self.inner
            .types
            .as_ref()
            .map(|t| t.api_version.as_str())
            .unwrap_or_default()
    }

    pub fn kind(&self) -> &str {
        self.inner
            .types
            .as_ref()
            .map(|t| t.kind.as_str())
            .unwrap_or_default()
    }

    pub fn name(&self) -> String {
        self.inner.name_any()
    }

    pub fn namespace(&self) -> Option<String> {
        self.inner.namespace()
    }

    pub fn gvk(&self) -> GroupVersionKind {
        let (group, version) = match self.api_version().split_once('/') {
            Some((group, version)) => (group.to_string(), version.to_string()),
            None => (String::new(), self.api_version().to_string()),
        };
        GroupVersionKind::gvk(&group, &version, self.kind())
    }

    pub fn api_resource(&self) -> ApiResource {
        ApiResource::from_gvk(&self.gvk())
    }

    pub fn owner_references(&self) -> &[OwnerReference] {
        self.inner
            .metadata
            .owner_references
            .as_deref()
            .unwrap_or_default()
    }

    pub fn set_owner_references(&mut self, refs: Vec<OwnerReference>) {
        self.inner.metadata.owner_references = Some(refs);
    }

    /// Pin the write to a known server version so a concurrent change is
    /// rejected with a conflict instead of overwritten.
    pub fn set_resource_version(&mut self, resource_version: Option<String>) {
        self.inner.metadata.resource_version = resource_version;
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.inner.metadata.resource_version.as_deref()
    }

    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind() == kind
    }

    /// Nested field lookup in the object payload, e.g. `&["spec", "replicas"]`.
    pub fn field(&self, path: &[&str]) -> Option<&serde_json::Value> {
        path.iter()
            .try_fold(&self.inner.data, |value, key| value.get(*key))
    }

    pub fn as_dynamic(&self) -> &DynamicObject {
        &self.inner
    }

    /// `Kind/name`, for logs and condition messages.
    pub fn display_ref(&self) -> String {
        format!("{}/{}", self.kind(), self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: serde_json::Value) -> RenderedObject {
        RenderedObject::new(serde_json::from_value(value).unwrap())
    }

    #[test]
    fn accessors_read_type_and_metadata() {
        let obj = object(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "mlflow", "namespace": "opendatahub"},
            "spec": {"replicas": 2}
        }));

        assert_eq!(obj.kind(), "Deployment");
        assert_eq!(obj.name(), "mlflow");
        assert_eq!(obj.namespace().as_deref(), Some("opendatahub"));
        assert_eq!(obj.field(&["spec", "replicas"]), Some(&json!(2)));
        assert_eq!(obj.display_ref(), "Deployment/mlflow");
        assert!(obj.owner_references().is_empty());
    }

    #[test]
    fn gvk_handles_core_and_grouped_versions() {
        let core = object(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {"name": "mlflow"}
        }));
        let gvk = core.gvk();
        assert_eq!(gvk.group, "");
        assert_eq!(gvk.version, "v1");

        let rbac = object(json!({
            "apiVersion": "rbac.authorization.k8s.io/v1",
            "kind": "ClusterRole",
            "metadata": {"name": "mlflow"}
        }));
        let ar = rbac.api_resource();
        assert_eq!(ar.group, "rbac.authorization.k8s.io");
        assert_eq!(ar.plural, "clusterroles");
        assert!(rbac.namespace().is_none());
    }
}
