use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use tracing::{debug, info, instrument, warn};

use crate::apply::apply;
use crate::capabilities::Capabilities;
use crate::client::ClusterOps;
use crate::config::OperatorConfig;
use crate::crd::{Condition, MLflow};
use crate::error::Error;
use crate::event::{self, EventKind};
use crate::metrics::{Metrics, RESULT_ERROR, RESULT_SUCCESS};
use crate::naming::{self, CLUSTER_ROLE_NAME, PLATFORM_CA_BUNDLE_CONFIGMAP};
use crate::object::RenderedObject;
use crate::ownership::{append_owner, set_controller_owner};
use crate::render::{RenderOptions, Renderer};
use crate::retry::RetryConfig;
use crate::routing::reconcile_integrations;
use crate::status::{self, AVAILABLE, PROGRESSING, condition, failed, find_condition, update_status};

/// Requeue while the workload has not been created yet.
pub const DEPLOYMENT_MISSING_REQUEUE: Duration = Duration::from_secs(5);
/// Requeue while the workload exists but is not serving.
pub const NOT_READY_REQUEUE: Duration = Duration::from_secs(10);

const ERROR_REQUEUE_BASE: Duration = Duration::from_secs(5);
const ERROR_REQUEUE_MAX: Duration = Duration::from_secs(300);

/// Shared state for every reconcile pass.
pub struct Ctx {
    pub cluster: Arc<dyn ClusterOps>,
    pub renderer: Renderer,
    pub config: OperatorConfig,
    /// Probed once at startup.
    pub capabilities: Capabilities,
    pub retry: RetryConfig,
    pub metrics: Arc<Metrics>,
    failures: DashMap<String, u32>,
}

impl Ctx {
    pub fn new(
        cluster: Arc<dyn ClusterOps>,
        renderer: Renderer,
        config: OperatorConfig,
        capabilities: Capabilities,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            cluster,
            renderer,
            config,
            capabilities,
            retry: RetryConfig::default(),
            metrics,
            failures: DashMap::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    NotReady { ready: i32, desired: i32 },
    ScaledToZero,
}

/// Desired replicas come from the live spec and default to 1.
pub fn assess(deployment: &Deployment) -> Readiness {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let ready = deployment
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);

    if desired == 0 {
        Readiness::ScaledToZero
    } else if ready >= desired {
        Readiness::Ready
    } else {
        Readiness::NotReady { ready, desired }
    }
}

fn readiness_conditions(readiness: Readiness) -> Vec<Condition> {
    match readiness {
        Readiness::Ready => vec![
            condition(
                AVAILABLE,
                true,
                status::REASON_DEPLOYMENT_READY,
                "MLflow deployment is ready and available",
            ),
            condition(
                PROGRESSING,
                false,
                status::REASON_RECONCILE_COMPLETE,
                "MLflow reconciliation completed successfully",
            ),
        ],
        Readiness::NotReady { ready, desired } => vec![condition(
            AVAILABLE,
            false,
            status::REASON_DEPLOYMENT_NOT_READY,
            format!("MLflow deployment not ready: {ready}/{desired} replicas ready"),
        )],
        Readiness::ScaledToZero => vec![condition(
            AVAILABLE,
            false,
            status::REASON_DEPLOYMENT_SCALED_TO_ZERO,
            "MLflow deployment scaled to zero replicas",
        )],
    }
}

#[instrument(skip(mlflow, ctx), fields(name = %mlflow.name_any()))]
pub async fn reconcile(mlflow: Arc<MLflow>, ctx: Arc<Ctx>) -> Result<Action, Error> {
    let name = mlflow.name_any();
    let started = Instant::now();

    let result = reconcile_instance(&name, &ctx).await;

    let label = if result.is_ok() {
        ctx.failures.remove(&name);
        RESULT_SUCCESS
    } else {
        RESULT_ERROR
    };
    ctx.metrics.observe(label, started.elapsed());
    result
}

async fn reconcile_instance(name: &str, ctx: &Ctx) -> Result<Action, Error> {
    let cluster = ctx.cluster.as_ref();
    let namespace = ctx.config.namespace.as_str();

    let Some(mlflow) = cluster.get_mlflow(name).await? else {
        debug!("instance not found, assuming deleted");
        return Ok(Action::await_change());
    };

    // Children carry owner references; garbage collection removes them.
    if mlflow.metadata.deletion_timestamp.is_some() {
        info!("instance is being deleted");
        return Ok(Action::await_change());
    }

    info!(namespace, "reconciling");

    match check_ca_bundle(cluster, &mlflow, namespace).await {
        Err(Error::Prerequisite { reason, message }) => {
            warn!(%reason, %message, "prerequisite not met");
            report_failure(
                ctx,
                &mlflow,
                &failed(&reason, message.clone()),
                event::REASON_PREREQUISITE_FAILED,
                &message,
            )
            .await;
            return Err(Error::Prerequisite { reason, message });
        }
        other => other?,
    }

    let options = RenderOptions {
        platform_ca_bundle_exists: cluster
            .get_config_map(PLATFORM_CA_BUNDLE_CONFIGMAP, namespace)
            .await?
            .is_some(),
    };

    let objects = match ctx.renderer.render(
        &mlflow,
        namespace,
        &ctx.config,
        &ctx.capabilities,
        &options,
    ) {
        Ok(objects) => objects,
        Err(e) => {
            let message = format!("Failed to render templates: {e}");
            warn!(error = %e, "render failed");
            report_failure(
                ctx,
                &mlflow,
                &failed(status::REASON_RENDER_FAILED, message.clone()),
                event::REASON_RENDER_FAILED,
                &message,
            )
            .await;
            return Err(e);
        }
    };

    for mut object in objects {
        if let Err(e) = assign_owner(cluster, &mlflow, &mut object).await {
            warn!(object = %object.display_ref(), error = %e, "failed to set owner reference, skipping");
            continue;
        }

        if let Err(e) = apply(cluster, &object).await {
            warn!(object = %object.display_ref(), error = %e, "apply failed");
            let conditions = vec![
                condition(
                    AVAILABLE,
                    false,
                    status::REASON_APPLY_FAILED,
                    format!("Failed to apply {}: {e}", object.display_ref()),
                ),
                condition(
                    PROGRESSING,
                    false,
                    status::REASON_APPLY_FAILED,
                    format!("Failed to apply resources: {e}"),
                ),
            ];
            let note = format!("Failed to apply {}: {e}", object.display_ref());
            report_failure(ctx, &mlflow, &conditions, event::REASON_APPLY_FAILED, &note).await;
            return Err(e);
        }
    }

    if let Err(e) =
        reconcile_integrations(cluster, &mlflow, namespace, &ctx.config, &ctx.capabilities).await
    {
        warn!(error = %e, "integration failed");
        let message = format!("Failed to apply resources: {e}");
        report_failure(
            ctx,
            &mlflow,
            &failed(status::REASON_APPLY_FAILED, message.clone()),
            event::REASON_APPLY_FAILED,
            &message,
        )
        .await;
        return Err(e);
    }

    let deployment_name = naming::resource_name(name);
    let Some(deployment) = cluster.get_deployment(&deployment_name, namespace).await? else {
        debug!(deployment = %deployment_name, "deployment not observed yet");
        return Ok(Action::requeue(DEPLOYMENT_MISSING_REQUEUE));
    };

    let readiness = assess(&deployment);
    let was_available = mlflow
        .status
        .as_ref()
        .and_then(|s| find_condition(&s.conditions, AVAILABLE))
        .is_some_and(|c| c.status == "True");

    match update_status(cluster, name, &readiness_conditions(readiness), &ctx.retry).await {
        Ok(()) => {}
        Err(e) if matches!(e, Error::Gone(_)) || e.is_not_found() => {
            debug!("instance deleted during reconcile");
            return Ok(Action::await_change());
        }
        Err(e) => return Err(e),
    }

    if readiness != Readiness::Ready {
        debug!(?readiness, "deployment not ready");
        return Ok(Action::requeue(NOT_READY_REQUEUE));
    }

    if !was_available {
        cluster
            .publish_event(
                &mlflow,
                EventKind::Normal,
                event::REASON_RECONCILED,
                "MLflow deployment is ready and available",
            )
            .await;
    }
    info!("reconciled");
    Ok(Action::await_change())
}

/// The shared ClusterRole is co-owned by every instance; anything else except
/// a Namespace gets this instance as its controller.
async fn assign_owner(
    cluster: &dyn ClusterOps,
    mlflow: &MLflow,
    object: &mut RenderedObject,
) -> Result<(), Error> {
    if object.is_kind("Namespace") {
        Ok(())
    } else if object.is_kind("ClusterRole") && object.name() == CLUSTER_ROLE_NAME {
        append_owner(cluster, mlflow, object).await
    } else {
        set_controller_owner(mlflow, object)
    }
}

/// A configured CA bundle must exist in the target namespace and hold its key.
async fn check_ca_bundle(
    cluster: &dyn ClusterOps,
    mlflow: &MLflow,
    namespace: &str,
) -> Result<(), Error> {
    let Some(bundle) = mlflow.spec.ca_bundle_config_map.as_ref() else {
        return Ok(());
    };

    let Some(config_map) = cluster.get_config_map(&bundle.name, namespace).await? else {
        return Err(Error::Prerequisite {
            reason: status::REASON_CA_BUNDLE_CONFIGMAP_NOT_FOUND.to_string(),
            message: format!(
                "CA bundle ConfigMap {} not found in namespace {namespace}",
                bundle.name
            ),
        });
    };

    let in_data = config_map
        .data
        .as_ref()
        .is_some_and(|d| d.contains_key(&bundle.key));
    let in_binary = config_map
        .binary_data
        .as_ref()
        .is_some_and(|d| d.contains_key(&bundle.key));
    if !in_data && !in_binary {
        return Err(Error::Prerequisite {
            reason: status::REASON_CA_BUNDLE_KEY_NOT_FOUND.to_string(),
            message: format!(
                "key {} not found in CA bundle ConfigMap {}",
                bundle.key, bundle.name
            ),
        });
    }
    Ok(())
}

/// Best effort: the failure is already on its way back to the controller.
async fn report_failure(
    ctx: &Ctx,
    mlflow: &MLflow,
    conditions: &[Condition],
    event_reason: &str,
    note: &str,
) {
    let cluster = ctx.cluster.as_ref();
    if let Err(e) = update_status(cluster, &mlflow.name_any(), conditions, &ctx.retry).await {
        warn!(error = %e, "failed to write failure status");
    }
    cluster
        .publish_event(mlflow, EventKind::Warning, event_reason, note)
        .await;
}

pub fn backoff_delay(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(6);
    (ERROR_REQUEUE_BASE * 2u32.pow(exponent)).min(ERROR_REQUEUE_MAX)
}

pub fn error_policy(mlflow: Arc<MLflow>, error: &Error, ctx: Arc<Ctx>) -> Action {
    let key = mlflow.name_any();
    let failures = {
        let mut entry = ctx.failures.entry(key.clone()).or_insert(0);
        *entry += 1;
        *entry
    };
    let delay = backoff_delay(failures);

    warn!(
        name = %key,
        error = %error,
        retry = failures,
        delay_secs = delay.as_secs(),
        "reconcile failed, will retry"
    );
    Action::requeue(delay)
}
