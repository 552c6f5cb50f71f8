//! Price aggregation across monitors.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use types::{time, PoolId, PriceSnapshot};

/// Retained snapshots per pool.
const HISTORY_CAPACITY: usize = 256;

/// Latest-price view over all monitored pools.
///
/// Single writer per pool (its monitor task), many readers. Reads are
/// lock-free on the hot path: the latest snapshot is an `Arc` swapped
/// atomically into the map, so the detector never blocks a publisher.
pub struct PriceOracle {
    latest: DashMap<PoolId, Arc<PriceSnapshot>>,
    history: DashMap<PoolId, Mutex<VecDeque<Arc<PriceSnapshot>>>>,
    stale_threshold_ns: u64,
}

impl PriceOracle {
    pub fn new(stale_threshold_ms: u64) -> Self {
        Self {
            latest: DashMap::new(),
            history: DashMap::new(),
            stale_threshold_ns: time::millis_to_ns(stale_threshold_ms),
        }
    }

    /// Publish a new snapshot, replacing the pool's latest pointer and
    /// appending to its bounded history.
    pub fn publish(&self, snapshot: PriceSnapshot) {
        let snapshot = Arc::new(snapshot);
        let pool_id = snapshot.pool_id.clone();

        let ring = self
            .history
            .entry(pool_id.clone())
            .or_insert_with(|| Mutex::new(VecDeque::with_capacity(HISTORY_CAPACITY)));
        {
            let mut ring = ring.lock();
            if ring.len() == HISTORY_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(snapshot.clone());
        }
        drop(ring);

        self.latest.insert(pool_id, snapshot);
    }

    /// Latest snapshot and its age relative to `now_ns`.
    pub fn latest(&self, pool: &PoolId, now_ns: u64) -> Option<(Arc<PriceSnapshot>, u64)> {
        let snapshot = self.latest.get(pool)?.clone();
        let age_ns = snapshot.age_ns(now_ns);
        Some((snapshot, age_ns))
    }

    /// Latest snapshot only if it is fresh at `now_ns`. Exactly at the
    /// threshold counts as fresh; one nanosecond beyond is stale.
    pub fn fresh(&self, pool: &PoolId, now_ns: u64) -> Option<Arc<PriceSnapshot>> {
        let (snapshot, age_ns) = self.latest(pool, now_ns)?;
        (age_ns <= self.stale_threshold_ns).then_some(snapshot)
    }

    /// Whether the pool has a snapshot at all, fresh or not.
    pub fn has_snapshot(&self, pool: &PoolId) -> bool {
        self.latest.contains_key(pool)
    }

    /// Pools currently carrying a snapshot.
    pub fn pools(&self) -> Vec<PoolId> {
        self.latest.iter().map(|entry| entry.key().clone()).collect()
    }

    /// History ring for a pool, oldest first.
    pub fn history(&self, pool: &PoolId) -> Vec<Arc<PriceSnapshot>> {
        self.history
            .get(pool)
            .map(|ring| ring.lock().iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn stale_threshold_ns(&self) -> u64 {
        self.stale_threshold_ns
    }
}
