//! Condition bookkeeping and conflict-safe status writes.

use chrono::{DateTime, SecondsFormat, Utc};
use kube::ResourceExt;
use tracing::{debug, instrument};

use crate::client::ClusterOps;
use crate::crd::Condition;
use crate::error::Error;
use crate::retry::{RetryConfig, retry_on_conflict};

pub const AVAILABLE: &str = "Available";
pub const PROGRESSING: &str = "Progressing";

pub const REASON_RENDER_FAILED: &str = "RenderFailed";
pub const REASON_APPLY_FAILED: &str = "ApplyFailed";
pub const REASON_DEPLOYMENT_READY: &str = "DeploymentReady";
pub const REASON_DEPLOYMENT_NOT_READY: &str = "DeploymentNotReady";
pub const REASON_DEPLOYMENT_SCALED_TO_ZERO: &str = "DeploymentScaledToZero";
pub const REASON_RECONCILE_COMPLETE: &str = "ReconcileComplete";
pub const REASON_CA_BUNDLE_CONFIGMAP_NOT_FOUND: &str = "CABundleConfigMapNotFound";
pub const REASON_CA_BUNDLE_KEY_NOT_FOUND: &str = "CABundleKeyNotFound";

pub fn condition(type_: &str, status: bool, reason: &str, message: impl Into<String>) -> Condition {
    Condition {
        r#type: type_.to_string(),
        status: if status { "True" } else { "False" }.to_string(),
        reason: reason.to_string(),
        message: message.into(),
        last_transition_time: None,
        observed_generation: None,
    }
}

/// `Available=False` and `Progressing=False`, both carrying `reason`.
pub fn failed(reason: &str, message: impl Into<String>) -> Vec<Condition> {
    let message = message.into();
    vec![
        condition(AVAILABLE, false, reason, message.clone()),
        condition(PROGRESSING, false, reason, message),
    ]
}

/// Upsert by type. The transition time only moves when the status flips.
pub fn set_condition(conditions: &mut Vec<Condition>, mut new: Condition, now: DateTime<Utc>) {
    let now = now.to_rfc3339_opts(SecondsFormat::Secs, true);
    match conditions.iter_mut().find(|c| c.r#type == new.r#type) {
        Some(existing) => {
            new.last_transition_time = if existing.status == new.status {
                existing.last_transition_time.clone().or(Some(now))
            } else {
                Some(now)
            };
            *existing = new;
        }
        None => {
            new.last_transition_time = Some(now);
            conditions.push(new);
        }
    }
}

pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == type_)
}

/// Write `desired` onto the latest copy of the instance.
///
/// Each attempt re-reads the instance and merges the conditions into its
/// current status, so a conflicting writer is never overwritten blindly.
#[instrument(skip(cluster, desired, retry))]
pub async fn update_status(
    cluster: &dyn ClusterOps,
    name: &str,
    desired: &[Condition],
    retry: &RetryConfig,
) -> Result<(), Error> {
    retry_on_conflict(retry, "update status", || async move {
        let latest = cluster
            .get_mlflow(name)
            .await?
            .ok_or_else(|| Error::Gone(name.to_string()))?;

        let generation = latest.metadata.generation;
        let mut status = latest.status.clone().unwrap_or_default();
        let now = Utc::now();
        for c in desired {
            let mut c = c.clone();
            c.observed_generation = generation;
            set_condition(&mut status.conditions, c, now);
        }

        cluster
            .patch_mlflow_status(name, latest.resource_version(), &status)
            .await?;
        debug!(conditions = desired.len(), "status written");
        Ok(())
    })
    .await
}
