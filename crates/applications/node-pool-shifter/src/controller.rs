//! Control loop
//!
//! ```text
//! ┌──────────── Idle ─────────────┐
//! │ list source nodes             │── error ──────────→ failed,  sleep ~interval
//! │ target zone distribution      │
//! │ evaluate decision             │── not warranted ──→ skipped, sleep ~interval
//! └──────────────┬────────────────┘
//!                ▼
//! ┌────────── Shifting ───────────┐
//! │ fresh distributions (max/zone)│── error ──────────→ failed,  sleep ~cycle_time
//! │ grow, verify, shrink          │── ok ─────────────→ shifted, sleep ~cycle_time
//! └───────────────────────────────┘
//! ```
//!
//! Any cycle that reached the shifting phase waits the cycle time, whether the
//! shift succeeded or not.
//!
//! Only one cycle is ever in flight. Shutdown is observed between cycles and
//! while sleeping, so a started shift always runs to completion.

use crate::config::ShifterConfig;
use crate::decision;
use crate::error::Result;
use crate::gcloud::NodePoolManager;
use crate::jitter::jittered_secs;
use crate::kubernetes::{LabelSelector, NodeDirectory};
use crate::metrics::{CycleOutcome, OutcomeRecorder};
use crate::shift::{ShiftExecutor, ShiftParameters, ShiftReport};
use crate::zones::zone_counts;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// What one cycle did and how long to wait before the next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    /// Outcome recorded for the cycle
    pub outcome: CycleOutcome,

    /// Whether the cycle entered the shifting phase
    pub attempted: bool,

    /// Jittered pause before the next cycle
    pub sleep: Duration,
}

/// Phase a cycle ended in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CyclePhase {
    Idle,
    Shifting,
}

/// Drives the rebalance cycle against a cluster
#[derive(Clone)]
pub struct Shifter {
    config: Arc<ShifterConfig>,
    directory: Arc<dyn NodeDirectory>,
    pools: Arc<dyn NodePoolManager>,
    recorder: Arc<dyn OutcomeRecorder>,
}

impl Shifter {
    /// Create a shifter
    pub fn new(
        config: Arc<ShifterConfig>,
        directory: Arc<dyn NodeDirectory>,
        pools: Arc<dyn NodePoolManager>,
        recorder: Arc<dyn OutcomeRecorder>,
    ) -> Self {
        Self {
            config,
            directory,
            pools,
            recorder,
        }
    }

    /// Run cycles until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            from = %self.config.from_pool,
            to = %self.config.to_pool,
            min_nodes_per_zone = self.config.min_nodes_per_zone,
            "Node pool shifter loop started"
        );

        while !shutdown.is_cancelled() {
            let report = self.run_cycle().await;

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(report.sleep) => {}
            }
        }

        info!("Node pool shifter loop stopped");
    }

    /// Run one cycle, record its outcome and pick the next sleep
    pub async fn run_cycle(&self) -> CycleReport {
        info!("Checking node pool to shift...");

        let (outcome, phase) = self.check_and_shift().await;
        let sleep = match phase {
            CyclePhase::Shifting => jittered_secs(self.config.cycle_time_secs),
            CyclePhase::Idle => jittered_secs(self.config.interval_secs),
        };

        self.recorder.record(outcome);
        info!(outcome = %outcome, "One cycle done, sleeping for {:?}...", sleep);

        CycleReport {
            outcome,
            attempted: phase == CyclePhase::Shifting,
            sleep,
        }
    }

    async fn check_and_shift(&self) -> (CycleOutcome, CyclePhase) {
        let config = &self.config;

        let source_selector = LabelSelector::new().with(&config.pool_label, &config.from_pool);
        let source_nodes = match self.directory.list_nodes(&source_selector).await {
            Ok(nodes) => nodes,
            Err(e) => {
                error!(node_pool = %config.from_pool, error = %e, "Error while getting the list of nodes");
                return (CycleOutcome::Failed, CyclePhase::Idle);
            }
        };

        let target = match zone_counts(
            self.directory.as_ref(),
            &config.pool_label,
            &config.zone_label,
            &config.to_pool,
        )
        .await
        {
            Ok(distribution) => distribution,
            Err(e) => {
                error!(node_pool = %config.to_pool, error = %e, "Error while determining zones");
                return (CycleOutcome::Failed, CyclePhase::Idle);
            }
        };

        let decision = match decision::evaluate(
            source_nodes.len(),
            target.zone_count(),
            config.min_nodes_per_zone,
            &config.to_pool,
        ) {
            Ok(decision) => decision,
            Err(e) => {
                error!(node_pool = %config.to_pool, error = %e, "Cannot compute per-zone size");
                return (CycleOutcome::Failed, CyclePhase::Idle);
            }
        };

        info!(
            node_pool = %config.from_pool,
            "Node pool has {} node(s) per zone, minimum wanted: {} node(s)",
            decision.per_zone_source_size, config.min_nodes_per_zone
        );

        if !decision.warranted {
            return (CycleOutcome::Skipped, CyclePhase::Idle);
        }

        info!(node_pool = %config.to_pool, "Attempting to shift one node per zone...");
        let outcome = match self.shift_once().await {
            Ok(report) => {
                info!(
                    from = %config.from_pool,
                    to = %config.to_pool,
                    from_size = report.from_new_size,
                    to_size = report.to_new_size,
                    "Shifted one node per zone"
                );
                CycleOutcome::Shifted
            }
            Err(e) => {
                error!(
                    from = %config.from_pool,
                    to = %config.to_pool,
                    error = %e,
                    "Node shift failed"
                );
                CycleOutcome::Failed
            }
        };

        (outcome, CyclePhase::Shifting)
    }

    /// Re-read both pools and run the two-phase shift
    async fn shift_once(&self) -> Result<ShiftReport> {
        let config = &self.config;
        let directory = self.directory.as_ref();

        let target = zone_counts(directory, &config.pool_label, &config.zone_label, &config.to_pool).await?;
        let source = zone_counts(directory, &config.pool_label, &config.zone_label, &config.from_pool).await?;

        let params = ShiftParameters {
            from_pool: config.from_pool.clone(),
            to_pool: config.to_pool.clone(),
            from_current_size: source.max_per_zone()?,
            to_current_size: target.max_per_zone()?,
        };

        ShiftExecutor::new(directory, self.pools.as_ref(), config)
            .shift(&params)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CountingRecorder, FakeCluster};

    const ZONES: [(&str, usize); 3] = [("a", 3), ("b", 3), ("c", 3)];

    fn shifter(cluster: &FakeCluster, min: usize) -> (Shifter, Arc<CountingRecorder>) {
        let recorder = Arc::new(CountingRecorder::default());
        let config = ShifterConfig::new("default", "spot")
            .with_min_nodes_per_zone(min)
            .with_verification(Duration::ZERO, Duration::ZERO);
        let shifter = Shifter::new(
            Arc::new(config),
            Arc::new(cluster.directory()),
            Arc::new(cluster.pools()),
            recorder.clone(),
        );
        (shifter, recorder)
    }

    fn cluster() -> FakeCluster {
        FakeCluster::new()
            .with_pool("default", &ZONES)
            .with_pool("spot", &ZONES)
    }

    fn within_jitter(sleep: Duration, base: u64) -> bool {
        let deviation = base / 4;
        sleep >= Duration::from_secs(base - deviation) && sleep < Duration::from_secs(base + deviation)
    }

    #[tokio::test]
    async fn test_shift_above_threshold() {
        let cluster = cluster();
        let (shifter, recorder) = shifter(&cluster, 2);

        let report = shifter.run_cycle().await;

        assert_eq!(report.outcome, CycleOutcome::Shifted);
        assert!(report.attempted);
        assert!(within_jitter(report.sleep, 10));
        assert_eq!(
            cluster.resizes(),
            vec![("spot".to_string(), 4), ("default".to_string(), 2)]
        );
        assert_eq!(cluster.total("spot"), 12);
        assert_eq!(cluster.total("default"), 6);
        assert_eq!(recorder.count(CycleOutcome::Shifted), 1);
    }

    #[tokio::test]
    async fn test_skip_at_threshold() {
        let cluster = cluster();
        let (shifter, recorder) = shifter(&cluster, 3);

        let report = shifter.run_cycle().await;

        assert_eq!(report.outcome, CycleOutcome::Skipped);
        assert!(!report.attempted);
        assert!(within_jitter(report.sleep, 300));
        assert!(cluster.resizes().is_empty());
        assert_eq!(recorder.count(CycleOutcome::Skipped), 1);
    }

    #[tokio::test]
    async fn test_grow_failure_never_shrinks() {
        let cluster = cluster();
        cluster.fail_resize("spot");
        let (shifter, recorder) = shifter(&cluster, 2);

        let report = shifter.run_cycle().await;

        assert_eq!(report.outcome, CycleOutcome::Failed);
        assert!(report.attempted);
        assert!(within_jitter(report.sleep, 10));
        assert!(cluster.resizes().iter().all(|(pool, _)| pool != "default"));
        assert_eq!(recorder.count(CycleOutcome::Failed), 1);
    }

    #[tokio::test]
    async fn test_listing_failure_fails_cycle() {
        let cluster = cluster();
        cluster.fail_listing(true);
        let (shifter, recorder) = shifter(&cluster, 0);

        let report = shifter.run_cycle().await;

        assert_eq!(report.outcome, CycleOutcome::Failed);
        assert!(!report.attempted);
        assert!(within_jitter(report.sleep, 300));
        assert_eq!(cluster.list_calls(), 1);
        assert!(cluster.resizes().is_empty());
        assert_eq!(recorder.count(CycleOutcome::Failed), 1);
    }

    #[tokio::test]
    async fn test_target_without_zones_fails_cycle() {
        let cluster = FakeCluster::new()
            .with_pool("default", &ZONES)
            .with_pool("spot", &[]);
        let (shifter, _) = shifter(&cluster, 0);

        let report = shifter.run_cycle().await;
        assert_eq!(report.outcome, CycleOutcome::Failed);
        assert!(within_jitter(report.sleep, 300));
        assert!(cluster.resizes().is_empty());
    }

    #[tokio::test]
    async fn test_empty_source_is_skipped() {
        let cluster = FakeCluster::new()
            .with_pool("default", &[])
            .with_pool("spot", &ZONES);
        let (shifter, _) = shifter(&cluster, 0);

        assert_eq!(shifter.run_cycle().await.outcome, CycleOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_over_provisioned_target_fails_cycle() {
        let cluster = cluster();
        cluster.overshoot("spot", 1);
        let (shifter, recorder) = shifter(&cluster, 2);

        let report = shifter.run_cycle().await;
        assert_eq!(report.outcome, CycleOutcome::Failed);
        assert!(within_jitter(report.sleep, 10));
        assert_eq!(cluster.resizes(), vec![("spot".to_string(), 4)]);
        assert_eq!(recorder.count(CycleOutcome::Failed), 1);
    }

    #[tokio::test]
    async fn test_uneven_zones_use_largest_zone() {
        let cluster = FakeCluster::new()
            .with_pool("default", &[("a", 4), ("b", 3), ("c", 3)])
            .with_pool("spot", &[("a", 1), ("b", 2), ("c", 2)]);
        let (shifter, _) = shifter(&cluster, 1);

        assert_eq!(shifter.run_cycle().await.outcome, CycleOutcome::Shifted);
        assert_eq!(
            cluster.resizes(),
            vec![("spot".to_string(), 3), ("default".to_string(), 3)]
        );
    }

    #[tokio::test]
    async fn test_run_stops_after_shutdown() {
        let cluster = cluster();
        let shutdown = CancellationToken::new();
        let recorder = Arc::new(CountingRecorder::cancelling(shutdown.clone()));
        let shifter = Shifter::new(
            Arc::new(ShifterConfig::new("default", "spot").with_min_nodes_per_zone(2)),
            Arc::new(cluster.directory()),
            Arc::new(cluster.pools()),
            recorder.clone(),
        );

        let handle = tokio::spawn(async move { shifter.run(shutdown).await });
        handle.await.unwrap();

        assert_eq!(recorder.total(), 1);
        assert_eq!(recorder.count(CycleOutcome::Shifted), 1);
        assert_eq!(cluster.total("default"), 6);
    }

    #[tokio::test]
    async fn test_run_with_cancelled_token_does_nothing() {
        let cluster = cluster();
        let (shifter, recorder) = shifter(&cluster, 2);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        shifter.run(shutdown).await;

        assert_eq!(recorder.total(), 0);
        assert_eq!(cluster.list_calls(), 0);
    }
}
