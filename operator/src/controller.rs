//! Controller wiring: the primary `MLflow` watch plus every secondary watch
//! that should wake an instance up.

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Secret, Service, ServiceAccount};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use kube::{Api, Client, Resource};
use kube_runtime::Controller;
use kube_runtime::reflector::ObjectRef;
use kube_runtime::watcher::Config as WatcherConfig;
use tracing::{debug, error, info};

use crate::capabilities::{
    CONSOLE_LINK_API_VERSION, CONSOLE_LINK_KIND, HTTP_ROUTE_API_VERSION, HTTP_ROUTE_KIND,
};
use crate::crd::MLflow;
use crate::naming::{CLUSTER_ROLE_NAME, PLATFORM_CA_BUNDLE_CONFIGMAP};
use crate::reconcile::{Ctx, error_policy, reconcile};
use crate::watch::{all_instance_requests, controller_owner_request, shared_owner_requests};

fn by_controller<K: Resource>(object: K) -> Option<ObjectRef<MLflow>> {
    controller_owner_request(object.meta())
}

fn by_name(name: &str) -> WatcherConfig {
    WatcherConfig::default().fields(&format!("metadata.name={name}"))
}

pub fn api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = api_version.split_once('/').unwrap_or(("", api_version));
    ApiResource::from_gvk(&GroupVersionKind::gvk(group, version, kind))
}

/// Build the controller. Watches on optional integrations are only added when
/// the cluster serves them.
pub fn build(client: Client, ctx: &Ctx) -> Controller<MLflow> {
    let ns = ctx.config.namespace.as_str();
    let capabilities = ctx.capabilities;

    let controller = Controller::new(Api::<MLflow>::all(client.clone()), WatcherConfig::default());
    let instances = controller.store();

    let mut controller = controller
        .watches(
            Api::<Deployment>::namespaced(client.clone(), ns),
            WatcherConfig::default(),
            by_controller,
        )
        .watches(
            Api::<Service>::namespaced(client.clone(), ns),
            WatcherConfig::default(),
            by_controller,
        )
        .watches(
            Api::<ServiceAccount>::namespaced(client.clone(), ns),
            WatcherConfig::default(),
            by_controller,
        )
        .watches(
            Api::<Secret>::namespaced(client.clone(), ns),
            WatcherConfig::default(),
            by_controller,
        )
        .watches(
            Api::<PersistentVolumeClaim>::namespaced(client.clone(), ns),
            WatcherConfig::default(),
            by_controller,
        )
        .watches(
            Api::<NetworkPolicy>::namespaced(client.clone(), ns),
            WatcherConfig::default(),
            by_controller,
        )
        .watches(
            Api::<ClusterRoleBinding>::all(client.clone()),
            WatcherConfig::default(),
            by_controller,
        )
        .watches(
            Api::<ClusterRole>::all(client.clone()),
            by_name(CLUSTER_ROLE_NAME),
            |role: ClusterRole| shared_owner_requests(&role.metadata),
        )
        .watches(
            Api::<ConfigMap>::namespaced(client.clone(), ns),
            by_name(PLATFORM_CA_BUNDLE_CONFIGMAP),
            move |_: ConfigMap| all_instance_requests(&instances.state()),
        );

    if capabilities.console_link {
        let ar = api_resource(CONSOLE_LINK_API_VERSION, CONSOLE_LINK_KIND);
        controller = controller.watches_with(
            Api::<DynamicObject>::all_with(client.clone(), &ar),
            ar,
            WatcherConfig::default(),
            by_controller,
        );
    }
    if capabilities.http_route {
        let ar = api_resource(HTTP_ROUTE_API_VERSION, HTTP_ROUTE_KIND);
        controller = controller.watches_with(
            Api::<DynamicObject>::namespaced_with(client.clone(), ns, &ar),
            ar,
            WatcherConfig::default(),
            by_controller,
        );
    }

    controller
}

/// Run until a shutdown signal arrives.
pub async fn run(client: Client, ctx: Arc<Ctx>) {
    info!(
        namespace = %ctx.config.namespace,
        console_link = ctx.capabilities.console_link,
        http_route = ctx.capabilities.http_route,
        "starting MLflow controller"
    );

    build(client, &ctx)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, action)) => debug!(name = %object.name, ?action, "reconcile completed"),
                Err(e) => error!(error = %e, "reconcile failed"),
            }
        })
        .await;

    info!("controller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn optional_kinds_resolve_to_plural_resources() {
        let link = api_resource(CONSOLE_LINK_API_VERSION, CONSOLE_LINK_KIND);
        assert_eq!(link.group, "console.openshift.io");
        assert_eq!(link.version, "v1");
        assert_eq!(link.plural, "consolelinks");

        let route = api_resource(HTTP_ROUTE_API_VERSION, HTTP_ROUTE_KIND);
        assert_eq!(route.api_version, "gateway.networking.k8s.io/v1");
        assert_eq!(route.plural, "httproutes");

        let core = api_resource("v1", "ConfigMap");
        assert_eq!(core.group, "");
        assert_eq!(core.version, "v1");
    }

    #[test]
    fn dynamic_children_map_through_controller_owner() {
        let route: DynamicObject = serde_json::from_value(json!({
            "apiVersion": HTTP_ROUTE_API_VERSION,
            "kind": HTTP_ROUTE_KIND,
            "metadata": {
                "name": "mlflow-team-a",
                "namespace": "opendatahub",
                "ownerReferences": [{
                    "apiVersion": "mlflow.opendatahub.io/v1",
                    "kind": "MLflow",
                    "name": "team-a",
                    "uid": "uid-team-a",
                    "controller": true
                }]
            }
        }))
        .unwrap();
        let request = by_controller(route).unwrap();
        assert_eq!(request.name, "team-a");
        assert!(request.namespace.is_none());
    }

    #[test]
    fn name_selector_targets_one_object() {
        let config = by_name(CLUSTER_ROLE_NAME);
        assert_eq!(config.field_selector.as_deref(), Some("metadata.name=mlflow"));
    }
}
