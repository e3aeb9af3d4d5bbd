use std::time::Duration;

use clap::Args;

/// Image used when neither the instance nor the environment names one.
pub const FALLBACK_MLFLOW_IMAGE: &str = "quay.io/opendatahub/mlflow:odh-stable";

/// Operator-wide defaults, read once at startup from flags or environment.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Default MLflow image for instances that do not set one
    #[arg(long, env = "MLFLOW_IMAGE", default_value = "quay.io/opendatahub/mlflow:master")]
    pub mlflow_image: String,

    /// Gateway the HTTPRoute attaches to
    #[arg(long, env = "GATEWAY_NAME", default_value = "data-science-gateway")]
    pub gateway_name: String,

    /// External base URL used by the console link
    #[arg(long, env = "MLFLOW_URL", default_value = "https://mlflow.example.com")]
    pub mlflow_url: String,

    /// Application menu section title of the console link
    #[arg(long, env = "SECTION_TITLE", default_value = "MLflow")]
    pub section_title: String,

    /// Namespace every namespaced MLflow resource is deployed into
    #[arg(long, env = "TARGET_NAMESPACE", default_value = "opendatahub")]
    pub namespace: String,

    /// Upper bound for a single cluster API call, in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,
}

impl OperatorConfig {
    pub fn default_image(&self) -> &str {
        if self.mlflow_image.is_empty() {
            FALLBACK_MLFLOW_IMAGE
        } else {
            &self.mlflow_image
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            mlflow_image: "quay.io/opendatahub/mlflow:master".into(),
            gateway_name: "data-science-gateway".into(),
            mlflow_url: "https://mlflow.example.com".into(),
            section_title: "MLflow".into(),
            namespace: "opendatahub".into(),
            request_timeout_secs: 30,
        }
    }
}
