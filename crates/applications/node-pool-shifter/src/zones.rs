//! Per-zone node distribution of a node pool
//!
//! Zone membership of a pool is not known up front: a regional pool may span
//! any subset of the region's zones. Counting is therefore done in two passes:
//!
//! ```text
//! list nodes {pool}            → distinct zone labels
//! list nodes {pool, zone} × N  → per-zone counts
//! ```

use crate::error::{Result, ShifterError};
use crate::kubernetes::{LabelSelector, NodeDirectory};
use std::collections::BTreeSet;
use tracing::debug;

/// Node count of one zone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneCount {
    /// Zone label value
    pub zone: String,

    /// Nodes of the pool in this zone
    pub nodes: usize,
}

/// Snapshot of a pool's node counts, one entry per observed zone, ordered by zone name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZoneDistribution {
    pool: String,
    zones: Vec<ZoneCount>,
}

impl ZoneDistribution {
    /// Build a distribution from per-zone counts
    pub fn new(pool: impl Into<String>, mut zones: Vec<ZoneCount>) -> Self {
        zones.sort_by(|a, b| a.zone.cmp(&b.zone));
        Self {
            pool: pool.into(),
            zones,
        }
    }

    /// Pool this snapshot was taken from
    pub fn pool(&self) -> &str {
        &self.pool
    }

    /// Per-zone entries
    pub fn zones(&self) -> &[ZoneCount] {
        &self.zones
    }

    /// Per-zone node counts in zone order
    pub fn counts(&self) -> Vec<usize> {
        self.zones.iter().map(|z| z.nodes).collect()
    }

    /// Number of zones observed
    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    /// Whether no zone was observed
    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// Total nodes across all zones
    pub fn total(&self) -> usize {
        sum(&self.counts())
    }

    /// Smallest and largest per-zone count
    pub fn min_and_max(&self) -> Option<(usize, usize)> {
        find_min_and_max(&self.counts())
    }

    /// Largest per-zone count, used as the basis for resize arithmetic
    pub fn max_per_zone(&self) -> Result<usize> {
        self.min_and_max()
            .map(|(_, max)| max)
            .ok_or_else(|| ShifterError::no_zones(&self.pool))
    }
}

/// Smallest and largest value, `None` for an empty slice
pub fn find_min_and_max(values: &[usize]) -> Option<(usize, usize)> {
    let first = *values.first()?;
    Some(
        values
            .iter()
            .fold((first, first), |(min, max), &v| (min.min(v), max.max(v))),
    )
}

/// Sum of all values, `0` for an empty slice
pub fn sum(values: &[usize]) -> usize {
    values.iter().sum()
}

/// Compute the per-zone node distribution of `pool`
///
/// Nodes without a zone label are left out. A pool with no nodes yields an
/// empty distribution. Listing errors are returned as-is.
pub async fn zone_counts<D>(
    directory: &D,
    pool_label: &str,
    zone_label: &str,
    pool: &str,
) -> Result<ZoneDistribution>
where
    D: NodeDirectory + ?Sized,
{
    let pool_selector = LabelSelector::new().with(pool_label, pool);
    let nodes = directory.list_nodes(&pool_selector).await?;

    let zone_names: BTreeSet<String> = nodes.into_iter().filter_map(|n| n.zone).collect();

    let mut zones = Vec::with_capacity(zone_names.len());
    for zone in zone_names {
        let selector = pool_selector.clone().with(zone_label, zone.as_str());
        let count = directory.list_nodes(&selector).await?.len();
        zones.push(ZoneCount { zone, nodes: count });
    }

    let distribution = ZoneDistribution::new(pool, zones);
    debug!(
        node_pool = %pool,
        zones = distribution.zone_count(),
        counts = ?distribution.counts(),
        "Computed zone distribution"
    );

    Ok(distribution)
}
