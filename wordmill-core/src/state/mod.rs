//! The aggregation state store: partial aggregates keyed by (window, key).
//!
//! Updates arrive concurrently from every ingestion partition; draining is
//! driven by the window-closing coordinator. The store is sharded by group
//! key, with one mutex per shard, so updates to different keys rarely
//! contend while updates to the same (window, key) pair serialize.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

use ahash::RandomState;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::types::{EventTime, EVENT_TIME_MIN};
use crate::window::{AggregateFunction, TimeWindow};

const DEFAULT_SHARDS: usize = 16;

/// Whether an update landed in an open window or hit one already drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// The target window was drained before this event arrived; the event's
    /// contribution to it is intentionally lost (bounded-lateness policy).
    LateWindow,
}

type ShardMap<Acc> = HashMap<(TimeWindow, String), Acc, RandomState>;

/// Sharded in-memory store of open window accumulators.
pub struct AggregationStateStore<A: AggregateFunction> {
    aggregate: A,
    shards: Vec<Mutex<ShardMap<A::Acc>>>,
    hasher: RandomState,
    /// Watermark of the most recent drain. Windows ending at or below this
    /// are closed; updates targeting them report [`UpdateOutcome::LateWindow`]
    /// instead of silently reopening drained state.
    closed_horizon: AtomicI64,
    open_windows: AtomicUsize,
}

/// Serialized store contents carried inside checkpoints.
#[derive(Serialize, Deserialize)]
struct StateSnapshot<Acc> {
    closed_horizon: EventTime,
    entries: Vec<(TimeWindow, String, Acc)>,
}

impl<A: AggregateFunction> AggregationStateStore<A> {
    pub fn new(aggregate: A) -> Self {
        Self::with_shards(aggregate, DEFAULT_SHARDS)
    }

    pub fn with_shards(aggregate: A, num_shards: usize) -> Self {
        let num_shards = num_shards.max(1);
        Self {
            aggregate,
            shards: (0..num_shards)
                .map(|_| Mutex::new(ShardMap::default()))
                .collect(),
            hasher: RandomState::new(),
            closed_horizon: AtomicI64::new(EVENT_TIME_MIN),
            open_windows: AtomicUsize::new(0),
        }
    }

    /// Fold `value` into the accumulator for (window, key), creating it on
    /// first touch. Serializes with other updates and drains on the same
    /// shard, so no update is ever lost or half-read.
    pub fn update(&self, window: TimeWindow, key: &str, value: f64) -> Result<UpdateOutcome> {
        let mut shard = self.lock_shard(key)?;
        // Horizon check under the shard lock: a drain that raised the
        // horizon has either already extracted this window's entry from
        // this shard or will, so inserting now would resurrect it.
        if window.is_closed_at(self.closed_horizon.load(Ordering::SeqCst)) {
            return Ok(UpdateOutcome::LateWindow);
        }
        let acc = match shard.entry((window, key.to_string())) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                self.open_windows.fetch_add(1, Ordering::SeqCst);
                entry.insert(self.aggregate.create_accumulator())
            }
        };
        self.aggregate.add(acc, value);
        Ok(UpdateOutcome::Applied)
    }

    /// Atomically remove and return every accumulator whose window has
    /// closed at `watermark`, sorted by (window, key) for deterministic
    /// emission. Subsequent updates to those windows report late.
    pub fn drain_closed(
        &self,
        watermark: EventTime,
    ) -> Result<Vec<(TimeWindow, String, A::Acc)>> {
        self.closed_horizon.fetch_max(watermark, Ordering::SeqCst);

        let mut drained = Vec::new();
        for (index, shard) in self.shards.iter().enumerate() {
            let mut shard = shard
                .lock()
                .map_err(|_| anyhow!("state shard {index} lock poisoned"))?;
            let closed: Vec<(TimeWindow, String)> = shard
                .keys()
                .filter(|(window, _)| window.is_closed_at(watermark))
                .cloned()
                .collect();
            for key in closed {
                if let Some(acc) = shard.remove(&key) {
                    self.open_windows.fetch_sub(1, Ordering::SeqCst);
                    drained.push((key.0, key.1, acc));
                }
            }
        }
        drained.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));
        Ok(drained)
    }

    /// Number of open (window, key) accumulators; drives ingestion
    /// backpressure.
    pub fn open_window_count(&self) -> usize {
        self.open_windows.load(Ordering::SeqCst)
    }

    /// Serialize all open accumulators plus the closed horizon.
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        let mut entries = Vec::new();
        for (index, shard) in self.shards.iter().enumerate() {
            let shard = shard
                .lock()
                .map_err(|_| anyhow!("state shard {index} lock poisoned"))?;
            for ((window, key), acc) in shard.iter() {
                entries.push((*window, key.clone(), acc.clone()));
            }
        }
        entries.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));
        let snapshot = StateSnapshot {
            closed_horizon: self.closed_horizon.load(Ordering::SeqCst),
            entries,
        };
        bincode::serialize(&snapshot).context("serialize aggregation state failed")
    }

    /// Replace the store's contents with a checkpoint snapshot.
    pub fn restore(&self, data: &[u8]) -> Result<()> {
        let snapshot: StateSnapshot<A::Acc> =
            bincode::deserialize(data).context("deserialize aggregation state failed")?;

        for (index, shard) in self.shards.iter().enumerate() {
            shard
                .lock()
                .map_err(|_| anyhow!("state shard {index} lock poisoned"))?
                .clear();
        }
        self.open_windows.store(0, Ordering::SeqCst);
        self.closed_horizon
            .store(snapshot.closed_horizon, Ordering::SeqCst);

        for (window, key, acc) in snapshot.entries {
            let mut shard = self.lock_shard(&key)?;
            match shard.entry((window, key)) {
                std::collections::hash_map::Entry::Occupied(mut entry) => {
                    self.aggregate.merge(entry.get_mut(), acc);
                }
                std::collections::hash_map::Entry::Vacant(entry) => {
                    self.open_windows.fetch_add(1, Ordering::SeqCst);
                    entry.insert(acc);
                }
            }
        }
        Ok(())
    }

    /// The aggregate function this store folds with.
    pub fn aggregate(&self) -> &A {
        &self.aggregate
    }

    /// Current accumulator for (window, key), if open.
    pub fn accumulator(&self, window: TimeWindow, key: &str) -> Result<Option<A::Acc>> {
        let shard = self.lock_shard(key)?;
        Ok(shard.get(&(window, key.to_string())).cloned())
    }

    fn lock_shard(&self, key: &str) -> Result<std::sync::MutexGuard<'_, ShardMap<A::Acc>>> {
        let index = (self.hasher.hash_one(key) % self.shards.len() as u64) as usize;
        self.shards[index]
            .lock()
            .map_err(|_| anyhow!("state shard {index} lock poisoned"))
    }
}

#[cfg(test)]
#[path = "tests/state_tests.rs"]
mod tests;
