use kube::Error as KubeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] KubeError),

    #[error("failed to convert MLflow spec to template values: {0}")]
    Values(#[from] serde_json::Error),

    #[error("failed to render template {template}: {source}")]
    Template {
        template: String,
        #[source]
        source: minijinja::Error,
    },

    #[error("failed to decode template {template}: {source}")]
    Decode {
        template: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid rendered object in {template}: {reason}")]
    InvalidObject { template: String, reason: String },

    #[error("{kind}/{name} is already controlled by {owner}")]
    AlreadyOwned {
        kind: String,
        name: String,
        owner: String,
    },

    #[error("MLflow {0} has no uid yet")]
    MissingUid(String),

    #[error("{reason}: {message}")]
    Prerequisite { reason: String, message: String },

    #[error("MLflow {0} no longer exists")]
    Gone(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("cluster call timed out: {0}")]
    Timeout(String),

    #[error("metrics server error: {0}")]
    Http(#[from] hyper::Error),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl Error {
    /// Optimistic-concurrency conflict reported by the API server.
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict(_) => true,
            Error::Kube(KubeError::Api(e)) => e.code == 409,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(KubeError::Api(e)) if e.code == 404)
    }
}
