//! Mapping from an `MLflow` spec to the value tree the templates render from.
//!
//! Every key is always present. Unset optionals serialize as `null` so the
//! templates can run with strict undefined handling.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{EnvFromSource, EnvVar, SecretKeySelector, Toleration};
use kube::ResourceExt;
use serde::Serialize;
use serde_json::{Value, json};

use crate::capabilities::Capabilities;
use crate::config::OperatorConfig;
use crate::crd::MLflow;
use crate::error::Error;
use crate::naming::{
    self, CLUSTER_ROLE_NAME, COMBINED_CA_BUNDLE_MOUNT_PATH, CUSTOM_CA_BUNDLE_MOUNT_PATH,
    PLATFORM_CA_BUNDLE_CONFIGMAP, PLATFORM_CA_BUNDLE_EXTRA_KEY, PLATFORM_CA_BUNDLE_KEY,
    PLATFORM_CA_BUNDLE_MOUNT_PATH, PLATFORM_CA_BUNDLE_VOLUME, SERVICE_ACCOUNT_NAME, STATIC_PREFIX,
    SYSTEM_CA_BUNDLE_PATH, TLS_SECRET_NAME,
};
use crate::render::RenderOptions;

pub const DEFAULT_BACKEND_STORE_URI: &str = "sqlite:////mlflow/mlflow.db";
pub const DEFAULT_ARTIFACTS_DESTINATION: &str = "file:///mlflow/artifacts";
pub const DEFAULT_STORAGE_SIZE: &str = "2Gi";
pub const DEFAULT_ACCESS_MODE: &str = "ReadWriteOnce";
pub const DEFAULT_REPLICAS: i32 = 1;
pub const DEFAULT_WORKERS: i32 = 1;
pub const SERVER_PORT: i32 = 8443;
pub const WORKSPACE_STORE_URI: &str = "kubernetes://";
pub const SERVING_CERT_ANNOTATION: &str = "service.beta.openshift.io/serving-cert-secret-name";

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Values {
    pub namespace: String,
    pub resource_suffix: String,
    pub cluster_role_name: String,
    pub common_labels: BTreeMap<String, String>,
    pub pod_labels: BTreeMap<String, String>,
    pub tls: TlsValues,
    pub ca_bundle_config_map: CustomCaBundleValues,
    pub platform_ca_bundle: PlatformCaBundleValues,
    pub ca_bundle: CombinedCaBundleValues,
    pub image: ImageValues,
    pub replica_count: i32,
    pub resources: Value,
    pub storage: StorageValues,
    pub mlflow: ServerValues,
    pub env: Vec<EnvVar>,
    pub env_from: Vec<EnvFromSource>,
    pub service_account: ServiceAccountValues,
    pub service: ServiceValues,
    pub pod_security_context: Value,
    pub security_context: Value,
    pub node_selector: BTreeMap<String, String>,
    pub tolerations: Vec<Toleration>,
    pub affinity: Value,
    pub capabilities: Capabilities,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TlsValues {
    pub secret_name: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CustomCaBundleValues {
    pub enabled: bool,
    pub name: Option<String>,
    pub key: Option<String>,
    pub mount_path: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlatformCaBundleValues {
    pub enabled: bool,
    pub config_map_name: String,
    pub volume_name: String,
    pub key: String,
    pub extra_key: String,
    pub mount_path: String,
    pub file_path: String,
    pub extra_file_path: String,
}

/// The combined bundle an init container assembles from the system bundle
/// and every configured bundle.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CombinedCaBundleValues {
    pub enabled: bool,
    pub mount_path: String,
    pub file_path: String,
    pub system_bundle_path: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageValues {
    pub name: String,
    pub image_pull_policy: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageValues {
    pub enabled: bool,
    pub size: String,
    pub storage_class_name: String,
    pub access_mode: String,
}

/// An env `valueFrom` source.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretSource {
    pub secret_key_ref: SecretKeySelector,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerValues {
    /// `None` whenever the URI comes from a secret.
    pub backend_store_uri: Option<String>,
    pub backend_store_uri_from: Option<SecretSource>,
    pub registry_store_uri: Option<String>,
    pub registry_store_uri_from: Option<SecretSource>,
    pub artifacts_destination: String,
    pub default_artifact_root: Option<String>,
    pub enable_workspaces: bool,
    pub workspace_store_uri: String,
    pub serve_artifacts: bool,
    pub workers: i32,
    pub port: i32,
    pub allowed_hosts: Vec<String>,
    pub static_prefix: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountValues {
    pub create: bool,
    pub name: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceValues {
    #[serde(rename = "type")]
    pub type_: String,
    pub port: i32,
    pub annotations: BTreeMap<String, String>,
}

pub fn mlflow_to_values(
    mlflow: &MLflow,
    namespace: &str,
    config: &OperatorConfig,
    capabilities: &Capabilities,
    options: &RenderOptions,
) -> Result<Values, Error> {
    let spec = &mlflow.spec;
    let suffix = naming::resource_suffix(&mlflow.name_any());

    let image = ImageValues {
        name: spec
            .image
            .as_ref()
            .and_then(|i| i.image.clone())
            .unwrap_or_else(|| config.default_image().to_string()),
        image_pull_policy: spec.image.as_ref().and_then(|i| i.image_pull_policy.clone()),
    };

    let custom_ca = spec.ca_bundle_config_map.as_ref();
    let ca_bundles_enabled = custom_ca.is_some() || options.platform_ca_bundle_exists;

    let service_account_name = spec
        .service_account_name
        .clone()
        .unwrap_or_else(|| format!("{SERVICE_ACCOUNT_NAME}{suffix}"));
    let tls_secret = format!("{TLS_SECRET_NAME}{suffix}");

    Ok(Values {
        namespace: namespace.to_string(),
        resource_suffix: suffix,
        cluster_role_name: CLUSTER_ROLE_NAME.to_string(),
        common_labels: BTreeMap::from([("component".to_string(), "mlflow".to_string())]),
        pod_labels: spec.pod_labels.clone(),
        tls: TlsValues {
            secret_name: tls_secret.clone(),
        },
        ca_bundle_config_map: CustomCaBundleValues {
            enabled: custom_ca.is_some(),
            name: custom_ca.map(|c| c.name.clone()),
            key: custom_ca.map(|c| c.key.clone()),
            mount_path: CUSTOM_CA_BUNDLE_MOUNT_PATH.to_string(),
        },
        platform_ca_bundle: PlatformCaBundleValues {
            enabled: options.platform_ca_bundle_exists,
            config_map_name: PLATFORM_CA_BUNDLE_CONFIGMAP.to_string(),
            volume_name: PLATFORM_CA_BUNDLE_VOLUME.to_string(),
            key: PLATFORM_CA_BUNDLE_KEY.to_string(),
            extra_key: PLATFORM_CA_BUNDLE_EXTRA_KEY.to_string(),
            mount_path: PLATFORM_CA_BUNDLE_MOUNT_PATH.to_string(),
            file_path: naming::platform_ca_bundle_file(),
            extra_file_path: naming::platform_ca_bundle_extra_file(),
        },
        ca_bundle: CombinedCaBundleValues {
            enabled: ca_bundles_enabled,
            mount_path: COMBINED_CA_BUNDLE_MOUNT_PATH.to_string(),
            file_path: naming::combined_ca_bundle_file(),
            system_bundle_path: SYSTEM_CA_BUNDLE_PATH.to_string(),
        },
        image,
        replica_count: spec.replicas.unwrap_or(DEFAULT_REPLICAS),
        resources: match &spec.resources {
            Some(r) => serde_json::to_value(r)?,
            None => Value::Null,
        },
        storage: storage_values(mlflow),
        mlflow: server_values(mlflow),
        env: spec.env.clone(),
        env_from: spec.env_from.clone(),
        service_account: ServiceAccountValues {
            create: true,
            name: service_account_name,
        },
        service: ServiceValues {
            type_: "ClusterIP".to_string(),
            port: SERVER_PORT,
            annotations: BTreeMap::from([(SERVING_CERT_ANNOTATION.to_string(), tls_secret)]),
        },
        pod_security_context: match &spec.pod_security_context {
            Some(ctx) => serde_json::to_value(ctx)?,
            None => json!({
                "runAsNonRoot": true,
                "seccompProfile": {"type": "RuntimeDefault"}
            }),
        },
        security_context: match &spec.security_context {
            Some(ctx) => serde_json::to_value(ctx)?,
            None => json!({
                "allowPrivilegeEscalation": false,
                "readOnlyRootFilesystem": false
            }),
        },
        node_selector: spec.node_selector.clone(),
        tolerations: spec.tolerations.clone(),
        affinity: match &spec.affinity {
            Some(a) => serde_json::to_value(a)?,
            None => json!({}),
        },
        capabilities: *capabilities,
    })
}

/// Storage is opt-in: only an explicit storage block enables the claim.
fn storage_values(mlflow: &MLflow) -> StorageValues {
    let mut values = StorageValues {
        enabled: false,
        size: DEFAULT_STORAGE_SIZE.to_string(),
        storage_class_name: String::new(),
        access_mode: DEFAULT_ACCESS_MODE.to_string(),
    };

    let Some(storage) = &mlflow.spec.storage else {
        return values;
    };

    values.enabled = true;
    if let Some(size) = storage
        .resources
        .as_ref()
        .and_then(|r| r.requests.as_ref())
        .and_then(|r| r.get("storage"))
    {
        values.size = size.0.clone();
    }
    if let Some(class) = &storage.storage_class_name {
        values.storage_class_name = class.clone();
    }
    if let Some(mode) = storage.access_modes.as_ref().and_then(|m| m.first()) {
        values.access_mode = mode.clone();
    }
    values
}

fn server_values(mlflow: &MLflow) -> ServerValues {
    let spec = &mlflow.spec;

    // A secret reference always wins over the literal for the same store.
    let backend_from = spec.backend_store_uri_from.clone().map(|secret_key_ref| SecretSource {
        secret_key_ref,
    });
    let backend_uri = if backend_from.is_some() {
        None
    } else {
        Some(
            spec.backend_store_uri
                .clone()
                .unwrap_or_else(|| DEFAULT_BACKEND_STORE_URI.to_string()),
        )
    };

    // The registry follows the backend unless configured on its own,
    // including inheriting the backend's secret reference.
    let (registry_uri, registry_from) = match (
        &spec.registry_store_uri_from,
        &spec.registry_store_uri,
    ) {
        (Some(secret), _) => (
            None,
            Some(SecretSource {
                secret_key_ref: secret.clone(),
            }),
        ),
        (None, Some(uri)) => (Some(uri.clone()), None),
        (None, None) => (backend_uri.clone(), backend_from.clone()),
    };

    ServerValues {
        backend_store_uri: backend_uri,
        backend_store_uri_from: backend_from,
        registry_store_uri: registry_uri,
        registry_store_uri_from: registry_from,
        artifacts_destination: spec
            .artifacts_destination
            .clone()
            .unwrap_or_else(|| DEFAULT_ARTIFACTS_DESTINATION.to_string()),
        default_artifact_root: spec.default_artifact_root.clone(),
        enable_workspaces: true,
        workspace_store_uri: WORKSPACE_STORE_URI.to_string(),
        serve_artifacts: spec.serve_artifacts.unwrap_or(false),
        workers: spec.workers.unwrap_or(DEFAULT_WORKERS),
        port: SERVER_PORT,
        allowed_hosts: vec!["*".to_string()],
        static_prefix: STATIC_PREFIX.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{CABundleConfigMap, ImageConfig, MLflowSpec};
    use k8s_openapi::api::core::v1::{PersistentVolumeClaimSpec, VolumeResourceRequirements};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    fn mlflow(name: &str, spec: MLflowSpec) -> MLflow {
        MLflow::new(name, spec)
    }

    fn secret(name: &str, key: &str) -> SecretKeySelector {
        serde_json::from_value(json!({"name": name, "key": key})).unwrap()
    }

    fn values(mlflow: &MLflow) -> Values {
        mlflow_to_values(
            mlflow,
            "opendatahub",
            &OperatorConfig::default(),
            &Capabilities::default(),
            &RenderOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn defaults_for_empty_spec() {
        let v = values(&mlflow("mlflow", MLflowSpec::default()));

        assert_eq!(v.resource_suffix, "");
        assert_eq!(v.replica_count, 1);
        assert_eq!(v.image.name, "quay.io/opendatahub/mlflow:master");
        assert_eq!(v.image.image_pull_policy, None);
        assert_eq!(v.mlflow.backend_store_uri.as_deref(), Some(DEFAULT_BACKEND_STORE_URI));
        assert_eq!(v.mlflow.registry_store_uri.as_deref(), Some(DEFAULT_BACKEND_STORE_URI));
        assert_eq!(v.mlflow.artifacts_destination, DEFAULT_ARTIFACTS_DESTINATION);
        assert!(v.mlflow.default_artifact_root.is_none());
        assert!(!v.mlflow.serve_artifacts);
        assert_eq!(v.mlflow.workers, 1);
        assert_eq!(v.mlflow.static_prefix, "/mlflow");
        assert_eq!(v.service_account.name, "mlflow-sa");
        assert!(!v.ca_bundle.enabled);
        assert_eq!(v.pod_security_context["runAsNonRoot"], true);
        assert_eq!(v.security_context["allowPrivilegeEscalation"], false);
        assert_eq!(v.affinity, json!({}));
        assert!(v.node_selector.is_empty());
        assert!(v.tolerations.is_empty());
    }

    #[test]
    fn storage_disabled_without_storage_block() {
        let v = values(&mlflow(
            "mlflow",
            MLflowSpec {
                replicas: Some(3),
                backend_store_uri: Some("postgresql://db/mlflow".into()),
                ..Default::default()
            },
        ));
        assert_eq!(
            v.storage,
            StorageValues {
                enabled: false,
                size: "2Gi".into(),
                storage_class_name: String::new(),
                access_mode: "ReadWriteOnce".into(),
            }
        );
    }

    #[test]
    fn storage_block_enables_claim_with_its_settings() {
        let storage = PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteMany".into()]),
            storage_class_name: Some("fast-ssd".into()),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity("20Gi".into()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        };
        let v = values(&mlflow(
            "mlflow",
            MLflowSpec {
                storage: Some(storage),
                ..Default::default()
            },
        ));
        assert!(v.storage.enabled);
        assert_eq!(v.storage.size, "20Gi");
        assert_eq!(v.storage.storage_class_name, "fast-ssd");
        assert_eq!(v.storage.access_mode, "ReadWriteMany");
    }

    #[test]
    fn empty_storage_block_uses_defaults() {
        let v = values(&mlflow(
            "mlflow",
            MLflowSpec {
                storage: Some(PersistentVolumeClaimSpec::default()),
                ..Default::default()
            },
        ));
        assert!(v.storage.enabled);
        assert_eq!(v.storage.size, DEFAULT_STORAGE_SIZE);
        assert_eq!(v.storage.access_mode, DEFAULT_ACCESS_MODE);
    }

    #[test]
    fn secret_reference_wins_over_literal() {
        let v = values(&mlflow(
            "mlflow",
            MLflowSpec {
                backend_store_uri: Some("postgresql://leaked".into()),
                backend_store_uri_from: Some(secret("db-creds", "backend-uri")),
                ..Default::default()
            },
        ));
        assert!(v.mlflow.backend_store_uri.is_none());
        assert_eq!(
            v.mlflow.backend_store_uri_from.as_ref().map(|s| &s.secret_key_ref),
            Some(&secret("db-creds", "backend-uri"))
        );
        let rendered = serde_json::to_string(&v).unwrap();
        assert!(!rendered.contains("postgresql://leaked"));
    }

    #[test]
    fn registry_inherits_backend_secret() {
        let v = values(&mlflow(
            "team-a",
            MLflowSpec {
                backend_store_uri_from: Some(secret("db-creds", "backend-uri")),
                ..Default::default()
            },
        ));
        assert_eq!(v.resource_suffix, "-team-a");
        assert_eq!(v.mlflow.registry_store_uri_from, v.mlflow.backend_store_uri_from);
        assert!(v.mlflow.registry_store_uri.is_none());
        assert!(v.mlflow.backend_store_uri.is_none());
    }

    #[test]
    fn registry_inherits_backend_literal() {
        let v = values(&mlflow(
            "mlflow",
            MLflowSpec {
                backend_store_uri: Some("postgresql://host/db".into()),
                ..Default::default()
            },
        ));
        assert_eq!(v.mlflow.registry_store_uri.as_deref(), Some("postgresql://host/db"));
        assert!(v.mlflow.registry_store_uri_from.is_none());
    }

    #[test]
    fn registry_literal_is_kept_next_to_backend_secret() {
        let v = values(&mlflow(
            "mlflow",
            MLflowSpec {
                backend_store_uri_from: Some(secret("db-creds", "backend-uri")),
                registry_store_uri: Some("postgresql://host/registry".into()),
                ..Default::default()
            },
        ));
        assert_eq!(
            v.mlflow.registry_store_uri.as_deref(),
            Some("postgresql://host/registry")
        );
        assert!(v.mlflow.registry_store_uri_from.is_none());
    }

    #[test]
    fn explicit_defaults_equal_omitted_fields() {
        let omitted = values(&mlflow("mlflow", MLflowSpec::default()));
        let explicit = values(&mlflow(
            "mlflow",
            MLflowSpec {
                replicas: Some(DEFAULT_REPLICAS),
                workers: Some(DEFAULT_WORKERS),
                serve_artifacts: Some(false),
                backend_store_uri: Some(DEFAULT_BACKEND_STORE_URI.into()),
                artifacts_destination: Some(DEFAULT_ARTIFACTS_DESTINATION.into()),
                ..Default::default()
            },
        ));
        assert_eq!(omitted, explicit);
    }

    #[test]
    fn image_override_and_pull_policy() {
        let v = values(&mlflow(
            "mlflow",
            MLflowSpec {
                image: Some(ImageConfig {
                    image: Some("custom/mlflow:v2.0.0".into()),
                    image_pull_policy: Some("IfNotPresent".into()),
                }),
                ..Default::default()
            },
        ));
        assert_eq!(v.image.name, "custom/mlflow:v2.0.0");
        assert_eq!(v.image.image_pull_policy.as_deref(), Some("IfNotPresent"));
    }

    #[test]
    fn ca_bundles_enable_combined_bundle() {
        let m = mlflow(
            "mlflow",
            MLflowSpec {
                ca_bundle_config_map: Some(CABundleConfigMap {
                    name: "my-ca".into(),
                    key: "ca.crt".into(),
                }),
                ..Default::default()
            },
        );
        let v = values(&m);
        assert!(v.ca_bundle_config_map.enabled);
        assert_eq!(v.ca_bundle_config_map.name.as_deref(), Some("my-ca"));
        assert!(v.ca_bundle.enabled);
        assert!(!v.platform_ca_bundle.enabled);

        let platform_only = mlflow_to_values(
            &mlflow("mlflow", MLflowSpec::default()),
            "opendatahub",
            &OperatorConfig::default(),
            &Capabilities::default(),
            &RenderOptions {
                platform_ca_bundle_exists: true,
            },
        )
        .unwrap();
        assert!(platform_only.platform_ca_bundle.enabled);
        assert!(platform_only.ca_bundle.enabled);
        assert!(!platform_only.ca_bundle_config_map.enabled);
    }

    #[test]
    fn suffixed_service_account_unless_named() {
        let v = values(&mlflow("team-a", MLflowSpec::default()));
        assert_eq!(v.service_account.name, "mlflow-sa-team-a");
        assert_eq!(v.tls.secret_name, "mlflow-tls-team-a");
        assert_eq!(
            v.service.annotations.get(SERVING_CERT_ANNOTATION).map(String::as_str),
            Some("mlflow-tls-team-a")
        );

        let named = values(&mlflow(
            "team-a",
            MLflowSpec {
                service_account_name: Some("custom-sa".into()),
                ..Default::default()
            },
        ));
        assert_eq!(named.service_account.name, "custom-sa");
    }
}
