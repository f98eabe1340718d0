//! Startup discovery of the cluster the shifter manages
//!
//! Errors here are fatal: they point at a misconfiguration that the control
//! loop cannot recover from, so they are returned to `main`.

use crate::error::{Result, ShifterError};
use crate::gcloud::{ClusterRef, MetadataClient, ProviderId};
use crate::kubernetes::{LabelSelector, NodeDirectory};
use tracing::info;

/// Find the GCE identity of a cluster node
///
/// Uses `node_name` when given, otherwise the first node the API returns.
pub async fn discover_provider_id(
    directory: &dyn NodeDirectory,
    node_name: Option<&str>,
) -> Result<ProviderId> {
    let node = match node_name {
        Some(name) => directory.get_node(name).await?,
        None => directory
            .list_nodes(&LabelSelector::new())
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ShifterError::config("there is no node in the cluster"))?,
    };

    let raw = node
        .provider_id
        .ok_or_else(|| ShifterError::InvalidProviderId(format!("node {} has none", node.name)))?;
    let provider = ProviderId::parse(&raw)?;

    info!(
        node = %node.name,
        project = %provider.project,
        zone = %provider.zone,
        "Discovered project from node"
    );
    Ok(provider)
}

/// Resolve the GKE cluster from a node and the metadata server
pub async fn discover_cluster(
    directory: &dyn NodeDirectory,
    metadata: &MetadataClient,
    node_name: Option<&str>,
    cluster_name: Option<&str>,
    cluster_location: Option<&str>,
) -> Result<ClusterRef> {
    let provider = discover_provider_id(directory, node_name).await?;
    let cluster = metadata
        .discover_cluster(&provider, cluster_name, cluster_location)
        .await?;

    info!(
        project = %cluster.project,
        location = %cluster.location,
        cluster = %cluster.name,
        "Discovered GKE cluster"
    );
    Ok(cluster)
}
