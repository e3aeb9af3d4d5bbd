use tracing::{debug, instrument};

use crate::client::ClusterOps;
use crate::error::Error;
use crate::object::RenderedObject;

/// Kinds whose spec cannot change after creation. Applied once, then left alone.
const CREATE_ONLY_KINDS: &[&str] = &["PersistentVolumeClaim"];

/// Push one rendered object to the cluster with server-side apply.
#[instrument(skip_all, fields(object = %object.display_ref()))]
pub async fn apply(cluster: &dyn ClusterOps, object: &RenderedObject) -> Result<(), Error> {
    if CREATE_ONLY_KINDS.contains(&object.kind()) && cluster.get_object(object).await?.is_some() {
        debug!("already exists, skipping");
        return Ok(());
    }
    cluster.apply_object(object).await
}
