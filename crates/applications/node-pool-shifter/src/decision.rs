//! Whether a shift cycle should run
//!
//! The minimum-nodes-per-zone floor keeps the source pool from being drained
//! below a safety margin in any zone. The divisor is the zone count of the
//! **target** pool; both pools are expected to live in the same zones.

use crate::error::{Result, ShifterError};

/// Outcome of evaluating the rebalance predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShiftDecision {
    /// Source nodes per zone (integer division)
    pub per_zone_source_size: usize,

    /// Whether one node per zone should be shifted
    pub warranted: bool,
}

/// Evaluate the rebalance predicate
///
/// Returns [`ShifterError::NoZones`] when `zone_count` is zero; `to_pool` is
/// only used to name the pool in that error.
pub fn evaluate(
    source_node_count: usize,
    zone_count: usize,
    min_nodes_per_zone: usize,
    to_pool: &str,
) -> Result<ShiftDecision> {
    if zone_count == 0 {
        return Err(ShifterError::no_zones(to_pool));
    }

    let per_zone_source_size = source_node_count / zone_count;
    let warranted = per_zone_source_size > min_nodes_per_zone && source_node_count > 0;

    Ok(ShiftDecision {
        per_zone_source_size,
        warranted,
    })
}
