//! Error types for the node pool shifter

use std::time::Duration;
use thiserror::Error;

/// Shifter result type
pub type Result<T> = std::result::Result<T, ShifterError>;

/// Errors that can occur while rebalancing node pools
#[derive(Error, Debug)]
pub enum ShifterError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Prometheus registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// GKE API rejected a request or an operation finished with an error
    #[error("GKE API error ({status}): {message}")]
    Gcp { status: u16, message: String },

    /// GCE metadata server error
    #[error("Metadata server error: {0}")]
    Metadata(String),

    /// Node provider ID could not be parsed into project details
    #[error("Invalid provider ID: {0}")]
    InvalidProviderId(String),

    /// A pool reported no zones, so per-zone sizes are undefined
    #[error("No zones observed for node pool {pool}")]
    NoZones { pool: String },

    /// Target pool holds more nodes than the resize asked for
    #[error(
        "Node pool {pool} is over-provisioned after resize: expected {expected} node(s), found {actual}"
    )]
    Verification {
        pool: String,
        expected: usize,
        actual: usize,
    },

    /// Target pool never reached the requested size
    #[error(
        "Node pool {pool} did not reach {expected} node(s) within {waited:?}, found {actual}"
    )]
    GrowthNotObserved {
        pool: String,
        expected: usize,
        actual: usize,
        waited: Duration,
    },

    /// Source pool has no node left to remove
    #[error("Node pool {pool} has no node left to remove")]
    SourceExhausted { pool: String },

    /// Requested pool size is not representable
    #[error("Invalid size {size} for node pool {pool}")]
    InvalidSize { pool: String, size: i64 },

    /// Node not found in the cluster
    #[error("Node {0} not found")]
    NodeNotFound(String),

    /// Timeout
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ShifterError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a metadata server error
    pub fn metadata(msg: impl Into<String>) -> Self {
        Self::Metadata(msg.into())
    }

    /// Create a no-zones error for a pool
    pub fn no_zones(pool: impl Into<String>) -> Self {
        Self::NoZones { pool: pool.into() }
    }

    /// Whether the error came from the post-grow verification step
    pub fn is_verification(&self) -> bool {
        matches!(
            self,
            Self::Verification { .. } | Self::GrowthNotObserved { .. }
        )
    }
}
