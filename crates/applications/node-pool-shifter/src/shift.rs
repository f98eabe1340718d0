//! Two-phase node shift
//!
//! Moves one node per zone from one pool to another without a capacity dip:
//!
//! ```text
//! 1. grow   target  → to_current + 1 per zone
//! 2. verify target  → sum(zones) == (to_current + 1) × zones
//! 3. shrink source  → from_current - 1 per zone
//! ```
//!
//! The source pool is never shrunk unless the target growth has been issued
//! and verified. A failed shrink leaves the target one node per zone larger;
//! there is no rollback and the next successful cycle evens it out.

use crate::config::ShifterConfig;
use crate::error::{Result, ShifterError};
use crate::gcloud::NodePoolManager;
use crate::kubernetes::NodeDirectory;
use crate::zones::zone_counts;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Inputs of one shift, sizes are per zone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShiftParameters {
    /// Pool losing a node per zone
    pub from_pool: String,

    /// Pool gaining a node per zone
    pub to_pool: String,

    /// Current per-zone size of the source pool
    pub from_current_size: usize,

    /// Current per-zone size of the target pool
    pub to_current_size: usize,
}

/// Sizes applied by a completed shift
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShiftReport {
    /// New per-zone size of the target pool
    pub to_new_size: usize,

    /// New per-zone size of the source pool
    pub from_new_size: usize,

    /// Target pool node count observed during verification
    pub target_nodes: usize,
}

/// Runs the grow / verify / shrink sequence against a cluster
pub struct ShiftExecutor<'a> {
    directory: &'a dyn NodeDirectory,
    pools: &'a dyn NodePoolManager,
    config: &'a ShifterConfig,
}

fn per_zone_size(pool: &str, size: usize) -> Result<i64> {
    i64::try_from(size).map_err(|_| ShifterError::InvalidSize {
        pool: pool.to_string(),
        size: i64::MAX,
    })
}

impl<'a> ShiftExecutor<'a> {
    /// Create an executor
    pub fn new(
        directory: &'a dyn NodeDirectory,
        pools: &'a dyn NodePoolManager,
        config: &'a ShifterConfig,
    ) -> Self {
        Self {
            directory,
            pools,
            config,
        }
    }

    /// Shift one node per zone from `from_pool` to `to_pool`
    pub async fn shift(&self, params: &ShiftParameters) -> Result<ShiftReport> {
        if params.from_current_size == 0 {
            return Err(ShifterError::SourceExhausted {
                pool: params.from_pool.clone(),
            });
        }

        let to_new_size = params.to_current_size + 1;
        info!(
            node_pool = %params.to_pool,
            "Adding 1 node to the pool for each zone, currently {} node(s), expecting {} node(s) per zone",
            params.to_current_size, to_new_size
        );

        if let Err(e) = self
            .pools
            .set_node_pool_size(&params.to_pool, per_zone_size(&params.to_pool, to_new_size)?)
            .await
        {
            error!(node_pool = %params.to_pool, error = %e, "Error resizing node pool");
            return Err(e);
        }

        let target_nodes = self.verify_growth(&params.to_pool, to_new_size).await?;

        let from_new_size = params.from_current_size - 1;
        info!(
            node_pool = %params.from_pool,
            "Removing 1 node from the pool for each zone, currently {} node(s), expecting {} node(s) per zone",
            params.from_current_size, from_new_size
        );

        if let Err(e) = self
            .pools
            .set_node_pool_size(
                &params.from_pool,
                per_zone_size(&params.from_pool, from_new_size)?,
            )
            .await
        {
            error!(node_pool = %params.from_pool, error = %e, "Error resizing node pool");
            return Err(e);
        }

        Ok(ShiftReport {
            to_new_size,
            from_new_size,
            target_nodes,
        })
    }

    /// Wait until `pool` holds exactly `per_zone` nodes in each of its zones
    ///
    /// More nodes than expected fails immediately. Fewer nodes are polled
    /// until the configured verification timeout runs out.
    async fn verify_growth(&self, pool: &str, per_zone: usize) -> Result<usize> {
        let started = Instant::now();
        let timeout = self.config.verify_timeout;

        loop {
            let distribution = zone_counts(
                self.directory,
                &self.config.pool_label,
                &self.config.zone_label,
                pool,
            )
            .await?;

            if distribution.is_empty() {
                return Err(ShifterError::no_zones(pool));
            }

            let actual = distribution.total();
            let expected = per_zone * distribution.zone_count();
            info!(
                node_pool = %pool,
                actual, expected,
                "Node pool sizes after resize"
            );

            if expected < actual {
                error!(
                    node_pool = %pool,
                    actual, expected,
                    "Node pool has more nodes than expected after resize"
                );
                return Err(ShifterError::Verification {
                    pool: pool.to_string(),
                    expected,
                    actual,
                });
            }

            if actual == expected {
                return Ok(actual);
            }

            let waited = started.elapsed();
            if waited >= timeout {
                error!(
                    node_pool = %pool,
                    actual, expected,
                    "Node pool did not reach the expected size in time"
                );
                return Err(ShifterError::GrowthNotObserved {
                    pool: pool.to_string(),
                    expected,
                    actual,
                    waited,
                });
            }

            warn!(
                node_pool = %pool,
                actual, expected,
                "Waiting for new nodes to register"
            );
            tokio::time::sleep(self.config.verify_poll_interval.min(timeout - waited)).await;
        }
    }
}
