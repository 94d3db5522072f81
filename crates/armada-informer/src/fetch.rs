//! Object lookup with a direct-read fallback

use kube::api::{ApiResource, DynamicObject};
use tracing::debug;

use armada_common::{has_managed_label, Result};

use crate::informer::FederatedInformer;
use crate::key::QualifiedName;

/// Get one managed object from a member cluster
///
/// A synced member is served from its mirror with no network call. Any
/// other member is read directly through its client, bypassing the mirror.
/// Missing objects and objects without the management label are both
/// `Ok(None)`.
pub async fn get_cluster_object(
    informer: &FederatedInformer<DynamicObject>,
    cluster: &str,
    name: &QualifiedName,
    api_resource: &ApiResource,
) -> Result<Option<DynamicObject>> {
    let mirrored = informer
        .target_store()
        .get_if_synced(cluster, &name.to_string())?;
    let object = match mirrored {
        Some(hit) => hit.map(|obj| DynamicObject::clone(&obj)),
        None => {
            debug!(cluster = %cluster, object = %name, "Member not synced, reading directly");
            let client = informer.client_for_cluster(cluster).await?;
            client.get_object(api_resource, name).await?
        }
    };
    Ok(object.filter(|obj| has_managed_label(obj)))
}
