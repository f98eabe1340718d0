//! GKE node pool management
//!
//! Resizes node pools through the GKE REST API. Credentials and cluster
//! identity come from the GCE metadata server of the node the shifter runs on.
//!
//! ## Metadata Endpoints
//!
//! ```text
//! http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token
//! http://metadata.google.internal/computeMetadata/v1/instance/attributes/cluster-name
//! http://metadata.google.internal/computeMetadata/v1/instance/attributes/cluster-location
//! ```
//!
//! ## Resize
//!
//! `setSize` returns a long-running operation. The call is considered done
//! only once the operation reports `DONE` without an error, so the caller can
//! rely on the managed instance groups having been resized when it returns.

use crate::error::{Result, ShifterError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// GCE metadata server base URL
pub const METADATA_BASE: &str = "http://metadata.google.internal";

/// GKE API base URL
pub const CONTAINER_API_BASE: &str = "https://container.googleapis.com";

/// Header required by the metadata server
const METADATA_FLAVOR_HEADER: &str = "Metadata-Flavor";

/// Refresh tokens this long before they expire
const TOKEN_EXPIRY_MARGIN_SECS: u64 = 60;

/// Default interval between operation status checks
const DEFAULT_OPERATION_POLL_SECS: u64 = 5;

/// Default upper bound for a resize operation
const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 900;

/// Cloud-side node pool resizing
#[async_trait]
pub trait NodePoolManager: Send + Sync {
    /// Set the per-zone node count of a pool
    async fn set_node_pool_size(&self, pool: &str, per_zone_size: i64) -> Result<()>;
}

/// Parsed GCE provider ID of a node (`gce://<project>/<zone>/<instance>`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderId {
    /// GCP project ID
    pub project: String,

    /// Zone of the instance
    pub zone: String,

    /// Instance name
    pub instance: String,
}

impl ProviderId {
    /// Parse a Kubernetes node `spec.providerID`
    pub fn parse(raw: &str) -> Result<Self> {
        let rest = raw
            .strip_prefix("gce://")
            .ok_or_else(|| ShifterError::InvalidProviderId(raw.to_string()))?;

        let parts: Vec<&str> = rest.split('/').collect();
        match parts.as_slice() {
            [project, zone, instance]
                if !project.is_empty() && !zone.is_empty() && !instance.is_empty() =>
            {
                Ok(Self {
                    project: project.to_string(),
                    zone: zone.to_string(),
                    instance: instance.to_string(),
                })
            }
            _ => Err(ShifterError::InvalidProviderId(raw.to_string())),
        }
    }
}

/// Fully qualified GKE cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterRef {
    /// GCP project ID
    pub project: String,

    /// Region or zone of the cluster
    pub location: String,

    /// Cluster name
    pub name: String,
}

impl ClusterRef {
    /// API resource path of the cluster
    pub fn path(&self) -> String {
        format!(
            "projects/{}/locations/{}/clusters/{}",
            self.project, self.location, self.name
        )
    }

    /// API resource path of one of the cluster's node pools
    pub fn node_pool_path(&self, pool: &str) -> String {
        format!("{}/nodePools/{}", self.path(), pool)
    }

    /// API resource path of an operation
    pub fn operation_path(&self, operation: &str) -> String {
        format!(
            "projects/{}/locations/{}/operations/{}",
            self.project, self.location, operation
        )
    }
}

/// OAuth access token from the metadata server
#[derive(Debug, Clone, Deserialize)]
pub struct AccessToken {
    /// Bearer token
    pub access_token: String,

    /// Lifetime in seconds
    pub expires_in: u64,
}

/// Client for the GCE metadata server
#[derive(Debug, Clone)]
pub struct MetadataClient {
    client: reqwest::Client,
    base_url: String,
}

impl MetadataClient {
    /// Create a client for the standard metadata server
    pub fn new() -> Result<Self> {
        Self::with_base_url(METADATA_BASE)
    }

    /// Create a client for a custom metadata base URL
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let url = format!("{}/computeMetadata/v1/{}", self.base_url, path);
        debug!("Querying metadata server at {}", url);

        let response = self
            .client
            .get(&url)
            .header(METADATA_FLAVOR_HEADER, "Google")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ShifterError::metadata(format!(
                "{} returned {}",
                path,
                response.status()
            )));
        }
        Ok(response)
    }

    /// Read a custom instance attribute
    pub async fn attribute(&self, name: &str) -> Result<String> {
        let value = self
            .get(&format!("instance/attributes/{}", name))
            .await?
            .text()
            .await?;
        Ok(value.trim().to_string())
    }

    /// Fetch an access token for the default service account
    pub async fn access_token(&self) -> Result<AccessToken> {
        let token = self
            .get("instance/service-accounts/default/token")
            .await?
            .json::<AccessToken>()
            .await?;
        Ok(token)
    }

    /// Resolve the cluster the node identified by `provider` belongs to
    ///
    /// Explicit overrides win over metadata attributes. Without a
    /// `cluster-location` attribute the node's zone is used.
    pub async fn discover_cluster(
        &self,
        provider: &ProviderId,
        name_override: Option<&str>,
        location_override: Option<&str>,
    ) -> Result<ClusterRef> {
        let name = match name_override {
            Some(name) => name.to_string(),
            None => self.attribute("cluster-name").await?,
        };

        let location = match location_override {
            Some(location) => location.to_string(),
            None => match self.attribute("cluster-location").await {
                Ok(location) if !location.is_empty() => location,
                Ok(_) => provider.zone.clone(),
                Err(e) => {
                    warn!(
                        "cluster-location attribute unavailable ({}), using node zone {}",
                        e, provider.zone
                    );
                    provider.zone.clone()
                }
            },
        };

        if name.is_empty() {
            return Err(ShifterError::metadata("cluster-name attribute is empty"));
        }

        Ok(ClusterRef {
            project: provider.project.clone(),
            location,
            name,
        })
    }
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Request body of `nodePools.setSize`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SetSizeRequest {
    node_count: i64,
}

/// Long-running GKE operation
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Operation {
    name: String,

    #[serde(default)]
    status: String,

    #[serde(default)]
    status_message: Option<String>,

    #[serde(default)]
    error: Option<ApiStatus>,
}

impl Operation {
    fn is_done(&self) -> bool {
        self.status == "DONE"
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ApiStatus {
    #[serde(default)]
    code: i32,

    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiStatus,
}

/// [`NodePoolManager`] backed by the GKE REST API
pub struct GkeNodePoolClient {
    client: reqwest::Client,
    api_base: String,
    cluster: ClusterRef,
    metadata: MetadataClient,
    token: Mutex<Option<CachedToken>>,
    operation_poll_interval: Duration,
    operation_timeout: Duration,
}

impl GkeNodePoolClient {
    /// Create a client for `cluster`, authenticating through `metadata`
    pub fn new(cluster: ClusterRef, metadata: MetadataClient) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            api_base: CONTAINER_API_BASE.to_string(),
            cluster,
            metadata,
            token: Mutex::new(None),
            operation_poll_interval: Duration::from_secs(DEFAULT_OPERATION_POLL_SECS),
            operation_timeout: Duration::from_secs(DEFAULT_OPERATION_TIMEOUT_SECS),
        })
    }

    /// Use a different API base URL
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Set how often a pending operation is polled
    pub fn with_operation_poll_interval(mut self, interval: Duration) -> Self {
        self.operation_poll_interval = interval;
        self
    }

    /// Set how long to wait for an operation to finish
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Cluster this client resizes pools of
    pub fn cluster(&self) -> &ClusterRef {
        &self.cluster
    }

    async fn bearer_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(ref token) = *cached {
            if Instant::now() < token.expires_at {
                return Ok(token.token.clone());
            }
        }

        let fresh = self.metadata.access_token().await?;
        let lifetime = fresh.expires_in.saturating_sub(TOKEN_EXPIRY_MARGIN_SECS);
        *cached = Some(CachedToken {
            token: fresh.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(lifetime),
        });
        Ok(fresh.access_token)
    }

    async fn parse_operation(response: reqwest::Response) -> Result<Operation> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<Operation>().await?);
        }

        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ApiErrorBody>(&body) {
            Ok(parsed) => parsed.error.message,
            Err(_) => body,
        };
        Err(ShifterError::Gcp {
            status: status.as_u16(),
            message,
        })
    }

    async fn get_operation(&self, name: &str) -> Result<Operation> {
        let url = format!("{}/v1/{}", self.api_base, self.cluster.operation_path(name));
        let token = self.bearer_token().await?;
        let response = self.client.get(&url).bearer_auth(token).send().await?;
        Self::parse_operation(response).await
    }

    async fn wait_for_operation(&self, mut operation: Operation) -> Result<()> {
        let started = Instant::now();

        loop {
            if operation.is_done() {
                if let Some(error) = operation.error {
                    return Err(ShifterError::Gcp {
                        status: u16::try_from(error.code).unwrap_or_default(),
                        message: error.message,
                    });
                }
                debug!(operation = %operation.name, "Operation done");
                return Ok(());
            }

            if started.elapsed() >= self.operation_timeout {
                warn!(
                    operation = %operation.name,
                    status = %operation.status,
                    message = operation.status_message.as_deref().unwrap_or(""),
                    "Gave up waiting for operation"
                );
                return Err(ShifterError::Timeout(self.operation_timeout));
            }

            tokio::time::sleep(self.operation_poll_interval).await;
            operation = self.get_operation(&operation.name).await?;
        }
    }
}

#[async_trait]
impl NodePoolManager for GkeNodePoolClient {
    async fn set_node_pool_size(&self, pool: &str, per_zone_size: i64) -> Result<()> {
        if per_zone_size < 0 {
            return Err(ShifterError::InvalidSize {
                pool: pool.to_string(),
                size: per_zone_size,
            });
        }

        let url = format!(
            "{}/v1/{}:setSize",
            self.api_base,
            self.cluster.node_pool_path(pool)
        );
        info!(node_pool = %pool, size = per_zone_size, "Requesting node pool resize");

        let token = self.bearer_token().await?;
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&SetSizeRequest {
                node_count: per_zone_size,
            })
            .send()
            .await?;

        let operation = Self::parse_operation(response).await?;
        self.wait_for_operation(operation).await
    }
}
