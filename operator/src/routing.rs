//! Side integrations: the console application-menu link and the gateway route.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use kube::ResourceExt;
use serde_json::json;
use tracing::{debug, instrument};

use crate::apply::apply;
use crate::capabilities::{
    CONSOLE_LINK_API_VERSION, CONSOLE_LINK_KIND, Capabilities, HTTP_ROUTE_API_VERSION,
    HTTP_ROUTE_KIND,
};
use crate::client::ClusterOps;
use crate::config::OperatorConfig;
use crate::crd::MLflow;
use crate::error::Error;
use crate::naming::{self, RESOURCE_NAME};
use crate::object::RenderedObject;
use crate::ownership::set_controller_owner;
use crate::values::SERVER_PORT;

const ICON_SVG: &[u8] = include_bytes!("../assets/mlflow_console_link_icon.svg");

pub const GATEWAY_NAMESPACE: &str = "openshift-ingress";

fn icon_data_url() -> String {
    format!("data:image/svg+xml;base64,{}", STANDARD.encode(ICON_SVG))
}

fn to_object(value: serde_json::Value, what: &str) -> Result<RenderedObject, Error> {
    serde_json::from_value(value)
        .map(RenderedObject::new)
        .map_err(|e| Error::InvalidObject {
            template: what.to_string(),
            reason: e.to_string(),
        })
}

pub fn console_link(mlflow: &MLflow, config: &OperatorConfig) -> Result<RenderedObject, Error> {
    let name = naming::resource_name(&mlflow.name_any());
    let mut object = to_object(
        json!({
            "apiVersion": CONSOLE_LINK_API_VERSION,
            "kind": CONSOLE_LINK_KIND,
            "metadata": {
                "name": name,
                "labels": {"app": RESOURCE_NAME},
            },
            "spec": {
                "text": "MLflow",
                "href": format!("{}/{}", config.mlflow_url.trim_end_matches('/'), name),
                "location": "ApplicationMenu",
                "applicationMenu": {
                    "section": config.section_title,
                    "imageURL": icon_data_url(),
                },
            },
        }),
        "ConsoleLink",
    )?;
    set_controller_owner(mlflow, &mut object)?;
    Ok(object)
}

fn rewrite_rule(path: &str, replace: Option<&str>, service: &str) -> serde_json::Value {
    let mut rule = json!({
        "matches": [{"path": {"type": "PathPrefix", "value": path}}],
        "backendRefs": [{"name": service, "port": SERVER_PORT, "weight": 1}],
    });
    if let Some(prefix) = replace {
        rule["filters"] = json!([{
            "type": "URLRewrite",
            "urlRewrite": {
                "path": {"type": "ReplacePrefixMatch", "replacePrefixMatch": prefix}
            }
        }]);
    }
    rule
}

/// Route `/mlflow<suffix>` on the platform gateway to the instance's Service.
pub fn http_route(
    mlflow: &MLflow,
    namespace: &str,
    config: &OperatorConfig,
) -> Result<RenderedObject, Error> {
    let name = naming::resource_name(&mlflow.name_any());
    let prefix = format!("/{name}");
    let mut object = to_object(
        json!({
            "apiVersion": HTTP_ROUTE_API_VERSION,
            "kind": HTTP_ROUTE_KIND,
            "metadata": {
                "name": name,
                "namespace": namespace,
                "labels": {"app": RESOURCE_NAME},
            },
            "spec": {
                "parentRefs": [{
                    "name": config.gateway_name,
                    "namespace": GATEWAY_NAMESPACE,
                }],
                "rules": [
                    rewrite_rule(&format!("{prefix}/api"), Some("/api"), &name),
                    rewrite_rule(&format!("{prefix}/v1"), Some("/v1"), &name),
                    rewrite_rule(&prefix, None, &name),
                ],
            },
        }),
        "HTTPRoute",
    )?;
    set_controller_owner(mlflow, &mut object)?;
    Ok(object)
}

/// Apply whichever integrations the cluster supports. Any failure aborts.
#[instrument(skip_all, fields(name = %mlflow.name_any()))]
pub async fn reconcile_integrations(
    cluster: &dyn ClusterOps,
    mlflow: &MLflow,
    namespace: &str,
    config: &OperatorConfig,
    capabilities: &Capabilities,
) -> Result<(), Error> {
    if capabilities.console_link {
        let link = console_link(mlflow, config)?;
        apply(cluster, &link).await?;
        debug!(object = %link.display_ref(), "console link reconciled");
    }
    if capabilities.http_route {
        let route = http_route(mlflow, namespace, config)?;
        apply(cluster, &route).await?;
        debug!(object = %route.display_ref(), "route reconciled");
    }
    Ok(())
}
