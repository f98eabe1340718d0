//! In-memory cluster shared by a fake node directory and a fake pool manager,
//! so that resizes show up in later listings.

use crate::error::{Result, ShifterError};
use crate::gcloud::NodePoolManager;
use crate::kubernetes::{DEFAULT_POOL_LABEL, DEFAULT_ZONE_LABEL, LabelSelector, Node, NodeDirectory};
use crate::metrics::{CycleOutcome, OutcomeRecorder};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct State {
    pools: BTreeMap<String, BTreeMap<String, usize>>,
    resizes: Vec<(String, i64)>,
    list_calls: usize,
    fail_listing: bool,
    failing_resizes: HashSet<String>,
    frozen: HashSet<String>,
    overshoot: HashMap<String, usize>,
    lagging: HashMap<String, usize>,
    pending: HashMap<String, (usize, usize)>,
}

impl State {
    fn apply(&mut self, pool: &str, per_zone: usize) {
        if let Some(zones) = self.pools.get_mut(pool) {
            for count in zones.values_mut() {
                *count = per_zone;
            }
        }
    }
}

#[derive(Clone, Default)]
pub(crate) struct FakeCluster {
    state: Arc<Mutex<State>>,
}

impl FakeCluster {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub(crate) fn with_pool(self, pool: &str, zones: &[(&str, usize)]) -> Self {
        let counts = zones.iter().map(|(z, n)| (z.to_string(), *n)).collect();
        self.lock().pools.insert(pool.to_string(), counts);
        self
    }

    pub(crate) fn directory(&self) -> FakeDirectory {
        FakeDirectory(self.clone())
    }

    pub(crate) fn pools(&self) -> FakePoolManager {
        FakePoolManager(self.clone())
    }

    /// Every listing fails
    pub(crate) fn fail_listing(&self, fail: bool) {
        self.lock().fail_listing = fail;
    }

    /// Resizes of `pool` are rejected
    pub(crate) fn fail_resize(&self, pool: &str) {
        self.lock().failing_resizes.insert(pool.to_string());
    }

    /// Resizes of `pool` are accepted but nodes never appear
    pub(crate) fn freeze(&self, pool: &str) {
        self.lock().frozen.insert(pool.to_string());
    }

    /// Resizes of `pool` create `extra` more nodes per zone than asked for
    pub(crate) fn overshoot(&self, pool: &str, extra: usize) {
        self.lock().overshoot.insert(pool.to_string(), extra);
    }

    /// Resizes of `pool` become visible after `listings` pool-wide listings
    pub(crate) fn lag(&self, pool: &str, listings: usize) {
        self.lock().lagging.insert(pool.to_string(), listings);
    }

    /// Resize calls issued so far, including rejected ones
    pub(crate) fn resizes(&self) -> Vec<(String, i64)> {
        self.lock().resizes.clone()
    }

    pub(crate) fn list_calls(&self) -> usize {
        self.lock().list_calls
    }

    pub(crate) fn zone_sizes(&self, pool: &str) -> Vec<usize> {
        self.lock()
            .pools
            .get(pool)
            .map(|zones| zones.values().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn total(&self, pool: &str) -> usize {
        self.zone_sizes(pool).iter().sum()
    }
}

pub(crate) struct FakeDirectory(FakeCluster);

#[async_trait]
impl NodeDirectory for FakeDirectory {
    async fn list_nodes(&self, selector: &LabelSelector) -> Result<Vec<Node>> {
        let mut state = self.0.lock();
        state.list_calls += 1;
        if state.fail_listing {
            return Err(ShifterError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "API server unreachable",
            )));
        }

        if let [(key, pool)] = selector.terms() {
            if key == DEFAULT_POOL_LABEL {
                let ready = match state.pending.get_mut(pool) {
                    Some((size, remaining)) => {
                        *remaining = remaining.saturating_sub(1);
                        (*remaining == 0).then_some(*size)
                    }
                    None => None,
                };
                if let Some(size) = ready {
                    state.pending.remove(pool);
                    state.apply(pool, size);
                }
            }
        }

        let mut nodes = Vec::new();
        for (pool, zones) in &state.pools {
            for (zone, count) in zones {
                let labels = [
                    (DEFAULT_POOL_LABEL, pool.as_str()),
                    (DEFAULT_ZONE_LABEL, zone.as_str()),
                ];
                if !selector.matches(labels.iter().copied()) {
                    continue;
                }
                for i in 0..*count {
                    let name = format!("gke-{}-{}-{}", pool, zone, i);
                    nodes.push(Node {
                        provider_id: Some(format!("gce://proj/{}/{}", zone, name)),
                        zone: Some(zone.clone()),
                        name,
                    });
                }
            }
        }
        Ok(nodes)
    }

    async fn get_node(&self, name: &str) -> Result<Node> {
        self.list_nodes(&LabelSelector::new())
            .await?
            .into_iter()
            .find(|n| n.name == name)
            .ok_or_else(|| ShifterError::NodeNotFound(name.to_string()))
    }
}

pub(crate) struct FakePoolManager(FakeCluster);

#[async_trait]
impl NodePoolManager for FakePoolManager {
    async fn set_node_pool_size(&self, pool: &str, per_zone_size: i64) -> Result<()> {
        let mut state = self.0.lock();
        state.resizes.push((pool.to_string(), per_zone_size));

        if state.failing_resizes.contains(pool) {
            return Err(ShifterError::Gcp {
                status: 500,
                message: format!("resize of {} rejected", pool),
            });
        }
        if !state.pools.contains_key(pool) {
            return Err(ShifterError::Gcp {
                status: 404,
                message: format!("node pool {} not found", pool),
            });
        }
        let size = usize::try_from(per_zone_size).map_err(|_| ShifterError::InvalidSize {
            pool: pool.to_string(),
            size: per_zone_size,
        })?;

        if state.frozen.contains(pool) {
            return Ok(());
        }
        if let Some(&listings) = state.lagging.get(pool) {
            state.pending.insert(pool.to_string(), (size, listings));
            return Ok(());
        }
        let extra = state.overshoot.get(pool).copied().unwrap_or(0);
        state.apply(pool, size + extra);
        Ok(())
    }
}

/// Outcome recorder that keeps per-outcome counts and can cancel a token
#[derive(Default)]
pub(crate) struct CountingRecorder {
    counts: Mutex<HashMap<CycleOutcome, u64>>,
    cancel_on_record: Option<CancellationToken>,
}

impl CountingRecorder {
    pub(crate) fn cancelling(token: CancellationToken) -> Self {
        Self {
            counts: Mutex::default(),
            cancel_on_record: Some(token),
        }
    }

    pub(crate) fn count(&self, outcome: CycleOutcome) -> u64 {
        self.counts.lock().unwrap().get(&outcome).copied().unwrap_or(0)
    }

    pub(crate) fn total(&self) -> u64 {
        self.counts.lock().unwrap().values().sum()
    }
}

impl OutcomeRecorder for CountingRecorder {
    fn record(&self, outcome: CycleOutcome) {
        *self.counts.lock().unwrap().entry(outcome).or_default() += 1;
        if let Some(ref token) = self.cancel_on_record {
            token.cancel();
        }
    }
}
