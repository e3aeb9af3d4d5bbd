use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Affinity, EnvFromSource, EnvVar, PersistentVolumeClaimSpec, PodSecurityContext,
    ResourceRequirements, SecretKeySelector, SecurityContext, Toleration,
};
use kube_derive::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Desired state of an MLflow deployment.
///
/// Cluster-scoped. Every namespaced object it produces lands in the
/// operator's target namespace.
#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "mlflow.opendatahub.io",
    version = "v1",
    kind = "MLflow",
    plural = "mlflows",
    derive = "Default",
    status = "MLflowStatus",
    printcolumn = r#"{"name":"Available","type":"string","jsonPath":".status.conditions[?(@.type==\"Available\")].status"}"#
)]
pub struct MLflowSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,

    /// Opt-in persistent storage. No claim is created when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<PersistentVolumeClaimSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_store_uri: Option<String>,

    /// Wins over `backendStoreUri` when both are set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_store_uri_from: Option<SecretKeySelector>,

    /// Defaults to the backend store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_store_uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_store_uri_from: Option<SecretKeySelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts_destination: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_artifact_root: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serve_artifacts: Option<bool>,

    /// Server worker processes per pod.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<i32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_from: Vec<EnvFromSource>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pod_labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_security_context: Option<PodSecurityContext>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<SecurityContext>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle_config_map: Option<CABundleConfigMap>,
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CABundleConfigMap {
    pub name: String,
    pub key: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MLflowStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: String,
    pub status: String,
    pub reason: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Per-namespace artifact storage override read by the MLflow workspaces.
#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "mlflow.opendatahub.io",
    version = "v1",
    kind = "MLflowConfig",
    plural = "mlflowconfigs",
    derive = "Default",
    namespaced
)]
pub struct MLflowConfigSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_root_path: Option<String>,
    pub artifact_root_secret: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;
    use serde_json::json;

    #[test]
    fn mlflow_is_cluster_scoped() {
        let crd = MLflow::crd();
        assert_eq!(crd.spec.scope, "Cluster");
        assert_eq!(crd.spec.group, "mlflow.opendatahub.io");
        assert_eq!(crd.spec.names.kind, "MLflow");
    }

    #[test]
    fn mlflow_config_is_namespaced() {
        let crd = MLflowConfig::crd();
        assert_eq!(crd.spec.scope, "Namespaced");
    }

    #[test]
    fn spec_deserializes_camel_case_fields() {
        let spec: MLflowSpec = serde_json::from_value(json!({
            "replicas": 2,
            "backendStoreUriFrom": {"name": "db-creds", "key": "backend-uri"},
            "serveArtifacts": true,
            "caBundleConfigMap": {"name": "my-ca", "key": "ca.crt"},
            "podLabels": {"team": "a"}
        }))
        .unwrap();

        assert_eq!(spec.replicas, Some(2));
        let from = serde_json::to_value(spec.backend_store_uri_from).unwrap();
        assert_eq!(from, json!({"name": "db-creds", "key": "backend-uri"}));
        assert_eq!(spec.serve_artifacts, Some(true));
        assert_eq!(spec.ca_bundle_config_map.unwrap().key, "ca.crt");
        assert_eq!(spec.pod_labels.get("team").map(String::as_str), Some("a"));
        assert!(spec.storage.is_none());
    }

    #[test]
    fn condition_type_field_is_named_type() {
        let cond = Condition {
            r#type: "Available".into(),
            status: "True".into(),
            reason: "DeploymentReady".into(),
            message: "ready".into(),
            ..Default::default()
        };
        let value = serde_json::to_value(&cond).unwrap();
        assert_eq!(value["type"], "Available");
        assert!(value.get("lastTransitionTime").is_none());
    }
}
