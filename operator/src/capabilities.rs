//! Optional integration kinds, probed once at startup.

use serde::Serialize;
use tracing::info;

use crate::client::ClusterOps;
use crate::error::Error;

pub const CONSOLE_LINK_API_VERSION: &str = "console.openshift.io/v1";
pub const CONSOLE_LINK_KIND: &str = "ConsoleLink";
pub const HTTP_ROUTE_API_VERSION: &str = "gateway.networking.k8s.io/v1";
pub const HTTP_ROUTE_KIND: &str = "HTTPRoute";

/// Which optional kinds this cluster serves. Immutable after startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub console_link: bool,
    pub http_route: bool,
}

impl Capabilities {
    pub async fn detect(cluster: &dyn ClusterOps) -> Result<Self, Error> {
        let caps = Self {
            console_link: probe(cluster, CONSOLE_LINK_API_VERSION, CONSOLE_LINK_KIND).await?,
            http_route: probe(cluster, HTTP_ROUTE_API_VERSION, HTTP_ROUTE_KIND).await?,
        };
        info!(
            console_link = caps.console_link,
            http_route = caps.http_route,
            "detected cluster capabilities"
        );
        Ok(caps)
    }
}

/// Whether `kind` is served under `group_version`. An unknown or unavailable
/// group/version is a clean `false`.
pub async fn probe(cluster: &dyn ClusterOps, group_version: &str, kind: &str) -> Result<bool, Error> {
    Ok(cluster
        .api_resource_kinds(group_version)
        .await?
        .is_some_and(|kinds| kinds.iter().any(|k| k == kind)))
}
