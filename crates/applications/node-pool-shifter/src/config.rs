//! Shifter configuration
//!
//! Flags and environment variables are parsed once at startup into an
//! immutable [`ShifterConfig`] that is passed by reference into the control
//! loop.

use crate::error::{Result, ShifterError};
use crate::kubernetes::{DEFAULT_POOL_LABEL, DEFAULT_ZONE_LABEL};
use crate::metrics::LIVENESS_PATH;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Shift GKE nodes from one node pool to another, one zone-balanced step at a time
#[derive(Parser, Debug, Clone)]
#[command(name = "node-pool-shifter")]
#[command(version, about, long_about = None)]
pub struct ShifterArgs {
    /// Time in seconds to wait between each node pool check
    #[arg(short = 'i', long, env = "INTERVAL", default_value_t = 300)]
    pub interval: u64,

    /// Time in seconds between node pool operations
    #[arg(short = 'c', long, env = "CYCLE_TIME", default_value_t = 10)]
    pub cycle_time: u64,

    /// The name of the node pool to shift from
    #[arg(long, env = "NODE_POOL_FROM")]
    pub node_pool_from: String,

    /// The name of the node pool to shift to
    #[arg(long, env = "NODE_POOL_TO")]
    pub node_pool_to: String,

    /// The minimum number of nodes per zone to keep in the node pool to shift from
    #[arg(long, env = "NODE_POOL_FROM_MIN_NODE", default_value_t = 0)]
    pub node_pool_from_min_node: usize,

    /// The address to listen on for Prometheus metrics requests
    #[arg(long, env = "METRICS_LISTEN_ADDRESS", default_value = "0.0.0.0:9001")]
    pub metrics_listen_address: SocketAddr,

    /// The path to listen for Prometheus metrics requests
    #[arg(long, env = "METRICS_PATH", default_value = "/metrics")]
    pub metrics_path: String,

    /// Path to a kubeconfig file, for out of cluster execution
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Node used to discover the GCP project (defaults to the first cluster node)
    #[arg(long, env = "NODE_NAME")]
    pub node_name: Option<String>,

    /// GKE cluster name (defaults to the `cluster-name` metadata attribute)
    #[arg(long, env = "CLUSTER_NAME")]
    pub cluster_name: Option<String>,

    /// GKE cluster location (defaults to the `cluster-location` metadata attribute)
    #[arg(long, env = "CLUSTER_LOCATION")]
    pub cluster_location: Option<String>,

    /// Node label holding the node pool name
    #[arg(long, env = "POOL_LABEL", default_value = DEFAULT_POOL_LABEL)]
    pub pool_label: String,

    /// Node label holding the availability zone
    #[arg(long, env = "ZONE_LABEL", default_value = DEFAULT_ZONE_LABEL)]
    pub zone_label: String,

    /// Seconds to wait for the grown pool to show its new nodes
    #[arg(long, env = "VERIFY_TIMEOUT", default_value_t = 300)]
    pub verify_timeout: u64,

    /// Seconds between node count checks while waiting for growth
    #[arg(long, env = "VERIFY_POLL_INTERVAL", default_value_t = 10)]
    pub verify_poll_interval: u64,
}

/// Immutable runtime configuration of the shifter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShifterConfig {
    /// Base interval between checks (seconds, jittered)
    pub interval_secs: u64,

    /// Interval after a successful shift (seconds, jittered)
    pub cycle_time_secs: u64,

    /// Pool losing nodes
    pub from_pool: String,

    /// Pool gaining nodes
    pub to_pool: String,

    /// Per-zone floor kept in the source pool
    pub min_nodes_per_zone: usize,

    /// Node label holding the pool name
    pub pool_label: String,

    /// Node label holding the zone
    pub zone_label: String,

    /// How long growth verification waits for new nodes
    pub verify_timeout: Duration,

    /// Poll interval during growth verification
    pub verify_poll_interval: Duration,

    /// Metrics listener
    pub metrics_addr: SocketAddr,

    /// Metrics HTTP path
    pub metrics_path: String,
}

impl ShifterConfig {
    /// Config with defaults for everything but the pool names
    pub fn new(from_pool: impl Into<String>, to_pool: impl Into<String>) -> Self {
        Self {
            interval_secs: 300,
            cycle_time_secs: 10,
            from_pool: from_pool.into(),
            to_pool: to_pool.into(),
            min_nodes_per_zone: 0,
            pool_label: DEFAULT_POOL_LABEL.to_string(),
            zone_label: DEFAULT_ZONE_LABEL.to_string(),
            verify_timeout: Duration::from_secs(300),
            verify_poll_interval: Duration::from_secs(10),
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 9001)),
            metrics_path: "/metrics".to_string(),
        }
    }

    /// Set the per-zone floor of the source pool
    pub fn with_min_nodes_per_zone(mut self, min: usize) -> Self {
        self.min_nodes_per_zone = min;
        self
    }

    /// Set the growth verification timing
    pub fn with_verification(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.verify_timeout = timeout;
        self.verify_poll_interval = poll_interval;
        self
    }

    /// Check the configuration for values the loop cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.from_pool.trim().is_empty() {
            return Err(ShifterError::config("source node pool name is empty"));
        }
        if self.to_pool.trim().is_empty() {
            return Err(ShifterError::config("target node pool name is empty"));
        }
        if self.from_pool == self.to_pool {
            return Err(ShifterError::config(format!(
                "source and target node pool are both {}",
                self.from_pool
            )));
        }
        if self.interval_secs == 0 {
            return Err(ShifterError::config("interval must be greater than 0"));
        }
        if self.cycle_time_secs == 0 {
            return Err(ShifterError::config("cycle time must be greater than 0"));
        }
        if !self.metrics_path.starts_with('/') {
            return Err(ShifterError::config(format!(
                "metrics path {} must start with /",
                self.metrics_path
            )));
        }
        if self.metrics_path == LIVENESS_PATH {
            return Err(ShifterError::config(format!(
                "metrics path {} is reserved for the liveness probe",
                LIVENESS_PATH
            )));
        }
        if !self.verify_timeout.is_zero() && self.verify_poll_interval.is_zero() {
            return Err(ShifterError::config(
                "verify poll interval must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl TryFrom<&ShifterArgs> for ShifterConfig {
    type Error = ShifterError;

    fn try_from(args: &ShifterArgs) -> Result<Self> {
        let config = Self {
            interval_secs: args.interval,
            cycle_time_secs: args.cycle_time,
            from_pool: args.node_pool_from.clone(),
            to_pool: args.node_pool_to.clone(),
            min_nodes_per_zone: args.node_pool_from_min_node,
            pool_label: args.pool_label.clone(),
            zone_label: args.zone_label.clone(),
            verify_timeout: Duration::from_secs(args.verify_timeout),
            verify_poll_interval: Duration::from_secs(args.verify_poll_interval),
            metrics_addr: args.metrics_listen_address,
            metrics_path: args.metrics_path.clone(),
        };
        config.validate()?;
        Ok(config)
    }
}
