//! # Node Pool Shifter
//!
//! Moves GKE capacity from one node pool to another, one node per zone at a
//! time, keeping every zone balanced.
//!
//! ## Architecture
//!
//! ```text
//! Control loop (controller)
//! ├── Zone distribution  ──→ Kubernetes API (kubernetes)
//! ├── Rebalance decision     (decision)
//! ├── Two-phase shift    ──→ GKE API (gcloud)
//! │     grow target, verify, shrink source
//! └── Outcome counter    ──→ Prometheus (metrics)
//! ```
//!
//! Each cycle either shifts one node per zone, skips because the source pool
//! is at its per-zone floor, or fails. Sleeps between cycles are jittered
//! (see [`jitter`]) so replicas across clusters do not call the GKE API in
//! lockstep.
//!
//! ## Grow Before Shrink
//!
//! The target pool is grown and verified before the source pool is shrunk.
//! A failure at any step aborts the cycle without rollback, which can leave
//! the cluster with more capacity than intended but never less.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bootstrap;
pub mod config;
pub mod controller;
pub mod decision;
pub mod error;
pub mod gcloud;
pub mod jitter;
pub mod kubernetes;
pub mod metrics;
pub mod shift;
pub mod zones;

#[cfg(test)]
pub(crate) mod testing;

// Error handling
pub use error::{Result, ShifterError};

// Configuration
pub use config::{ShifterArgs, ShifterConfig};

// Control loop
pub use controller::{CycleReport, Shifter};
pub use decision::{ShiftDecision, evaluate};
pub use shift::{ShiftExecutor, ShiftParameters, ShiftReport};

// Zone accounting
pub use zones::{ZoneCount, ZoneDistribution, find_min_and_max, sum, zone_counts};

// Scheduling
pub use jitter::{apply_jitter, jittered_secs};

// Collaborators
pub use gcloud::{ClusterRef, GkeNodePoolClient, MetadataClient, NodePoolManager, ProviderId};
pub use kubernetes::{KubeNodeDirectory, LabelSelector, Node, NodeDirectory};
pub use metrics::{CycleOutcome, OutcomeRecorder, ShifterMetrics};
