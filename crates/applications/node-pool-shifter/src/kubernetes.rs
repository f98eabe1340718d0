//! Kubernetes node directory
//!
//! The shifter only needs two read operations against the cluster: listing
//! nodes matching a label selector, and fetching a single node by name. Both
//! are behind [`NodeDirectory`] so the rebalancing logic can run against an
//! in-memory cluster in tests.

use crate::error::{Result, ShifterError};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node as KubeNode;
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

/// GKE label carrying the node pool name
pub const DEFAULT_POOL_LABEL: &str = "cloud.google.com/gke-nodepool";

/// Well-known label carrying the node's availability zone
pub const DEFAULT_ZONE_LABEL: &str = "topology.kubernetes.io/zone";

/// Exact-match conjunction of label key/value pairs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    terms: Vec<(String, String)>,
}

impl LabelSelector {
    /// Empty selector (matches every node)
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a `key=value` requirement
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.terms.push((key.into(), value.into()));
        self
    }

    /// Selector terms in insertion order
    pub fn terms(&self) -> &[(String, String)] {
        &self.terms
    }

    /// Whether a label set satisfies every term
    pub fn matches<'a, I>(&self, labels: I) -> bool
    where
        I: IntoIterator<Item = (&'a str, &'a str)> + Clone,
    {
        self.terms.iter().all(|(key, value)| {
            labels
                .clone()
                .into_iter()
                .any(|(k, v)| k == key && v == value)
        })
    }

    /// Whether the selector has no terms
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .terms
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        write!(f, "{}", rendered.join(","))
    }
}

/// The parts of a cluster node the shifter cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Node name
    pub name: String,

    /// Value of the zone label, if present
    pub zone: Option<String>,

    /// Cloud provider ID (`gce://project/zone/instance` on GKE)
    pub provider_id: Option<String>,
}

impl Node {
    /// Project a Kubernetes node, reading the zone from `zone_label`
    pub fn from_kube(node: &KubeNode, zone_label: &str) -> Self {
        let name = node.metadata.name.clone().unwrap_or_default();
        let zone = node
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(zone_label).cloned());
        let provider_id = node.spec.as_ref().and_then(|spec| spec.provider_id.clone());

        Self {
            name,
            zone,
            provider_id,
        }
    }
}

/// Read access to cluster nodes
#[async_trait]
pub trait NodeDirectory: Send + Sync {
    /// List nodes matching every term of the selector
    async fn list_nodes(&self, selector: &LabelSelector) -> Result<Vec<Node>>;

    /// Fetch a node by name
    async fn get_node(&self, name: &str) -> Result<Node>;
}

/// [`NodeDirectory`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeNodeDirectory {
    api: Api<KubeNode>,
    zone_label: String,
}

impl KubeNodeDirectory {
    /// Create a directory from a connected client
    pub fn new(client: Client, zone_label: impl Into<String>) -> Self {
        Self {
            api: Api::all(client),
            zone_label: zone_label.into(),
        }
    }
}

#[async_trait]
impl NodeDirectory for KubeNodeDirectory {
    async fn list_nodes(&self, selector: &LabelSelector) -> Result<Vec<Node>> {
        let mut params = ListParams::default();
        if !selector.is_empty() {
            params = params.labels(&selector.to_string());
        }

        let list = self.api.list(&params).await?;
        debug!(selector = %selector, count = list.items.len(), "Listed nodes");

        Ok(list
            .items
            .iter()
            .map(|node| Node::from_kube(node, &self.zone_label))
            .collect())
    }

    async fn get_node(&self, name: &str) -> Result<Node> {
        match self.api.get_opt(name).await? {
            Some(node) => Ok(Node::from_kube(&node, &self.zone_label)),
            None => Err(ShifterError::NodeNotFound(name.to_string())),
        }
    }
}

/// Build a Kubernetes client
///
/// With an explicit kubeconfig path the file's current context is used.
/// Otherwise the in-cluster service account is tried first, then the default
/// kubeconfig location.
pub async fn connect(kubeconfig: Option<&Path>) -> Result<Client> {
    let client = match kubeconfig {
        Some(path) => {
            info!(path = %path.display(), "Creating out of cluster client");
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                ShifterError::config(format!("reading kubeconfig {}: {}", path.display(), e))
            })?;
            let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| ShifterError::config(format!("loading kubeconfig: {}", e)))?;
            Client::try_from(config)?
        }
        None => {
            info!("Creating client from in-cluster or default configuration");
            Client::try_default().await?
        }
    };

    Ok(client)
}
