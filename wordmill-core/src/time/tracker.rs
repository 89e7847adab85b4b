use super::*;

/// Tracks per-partition event-time progress and computes the global watermark.
///
/// Each ingestion partition reports the event times it observes; the global
/// watermark is the minimum across partitions of (max seen − allowed
/// lateness), because a slower partition may still deliver events with
/// earlier timestamps.
///
/// # Unobserved and idle partitions
/// A partition that has never reported blocks the watermark entirely:
/// [`current_watermark`](Self::current_watermark) stays `None` until every
/// active partition has observed at least one event. That policy is
/// deliberate: closing windows while a partition's event-time position is
/// unknown could finalize them too early. To keep one quiet partition from stalling
/// the pipeline forever, a partition inactive for longer than the idle
/// timeout is excluded from the minimum until it reports again; if every
/// partition goes idle, progress is bounded by the observed maxima.
pub struct WatermarkTracker {
    /// Per-partition max observed event time. EVENT_TIME_MIN = never reported.
    partition_maxes: Vec<EventTime>,
    /// Whether each partition is currently excluded as idle.
    is_idle: Vec<bool>,
    /// Last observe() call per partition.
    last_active: Vec<Instant>,
    allowed_lateness_ms: i64,
    idle_timeout: Option<Duration>,
    /// Monotonic floor: the watermark never reports below this once set.
    floor: EventTime,
}

/// Serializable tracker state carried inside checkpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatermarkSnapshot {
    pub partition_maxes: Vec<EventTime>,
    pub floor: EventTime,
}

impl WatermarkTracker {
    /// Create a tracker for `num_partitions` ingestion partitions.
    pub fn new(num_partitions: usize, allowed_lateness: Duration) -> Self {
        let now = Instant::now();
        Self {
            partition_maxes: vec![EVENT_TIME_MIN; num_partitions],
            is_idle: vec![false; num_partitions],
            last_active: vec![now; num_partitions],
            allowed_lateness_ms: allowed_lateness.as_millis() as i64,
            idle_timeout: None,
            floor: EVENT_TIME_MIN,
        }
    }

    /// Create a tracker that excludes partitions quiet for `idle_timeout`.
    pub fn with_idle_timeout(
        num_partitions: usize,
        allowed_lateness: Duration,
        idle_timeout: Duration,
    ) -> Self {
        let mut tracker = Self::new(num_partitions, allowed_lateness);
        tracker.idle_timeout = Some(idle_timeout);
        tracker
    }

    /// Record an observed event time for `partition`.
    ///
    /// Updates the partition's max if `event_time` exceeds it; otherwise a
    /// no-op, since an out-of-order event never moves the watermark in
    /// either direction. Observing always marks the partition active again.
    pub fn observe(&mut self, partition: PartitionId, event_time: EventTime) {
        if event_time > self.partition_maxes[partition] {
            self.partition_maxes[partition] = event_time;
        }
        self.is_idle[partition] = false;
        self.last_active[partition] = Instant::now();
    }

    /// Compute the current global watermark.
    ///
    /// Returns `None` while any non-idle partition has yet to report.
    /// Re-evaluates idleness first, so a partition crossing its idle timeout
    /// stops blocking the result as of this call. When every partition is
    /// idle, progress is bounded by the maxima already observed.
    pub fn current_watermark(&mut self) -> Option<Watermark> {
        self.detect_idle_partitions();

        let mut min_active: Option<EventTime> = None;
        for (max_seen, idle) in self.partition_maxes.iter().zip(self.is_idle.iter()) {
            if *idle {
                continue;
            }
            if *max_seen == EVENT_TIME_MIN {
                // Active partition with no data yet blocks all closure.
                return self.floor_watermark();
            }
            min_active = Some(min_active.map_or(*max_seen, |m| m.min(*max_seen)));
        }

        let min_seen = min_active.or_else(|| {
            // Everything is idle: advance as far as the observed partitions
            // allow instead of freezing below data already ingested.
            self.partition_maxes
                .iter()
                .filter(|max_seen| **max_seen != EVENT_TIME_MIN)
                .min()
                .copied()
        });

        if let Some(min_seen) = min_seen {
            let candidate = min_seen.saturating_sub(self.allowed_lateness_ms);
            if candidate > self.floor {
                self.floor = candidate;
            }
        }
        self.floor_watermark()
    }

    /// Per-partition maxima and floor for checkpointing.
    pub fn snapshot(&self) -> WatermarkSnapshot {
        WatermarkSnapshot {
            partition_maxes: self.partition_maxes.clone(),
            floor: self.floor,
        }
    }

    /// Restore from a checkpoint snapshot. Activity clocks restart: every
    /// partition is considered active as of now.
    pub fn restore(&mut self, snapshot: WatermarkSnapshot) {
        let now = Instant::now();
        self.is_idle = vec![false; snapshot.partition_maxes.len()];
        self.last_active = vec![now; snapshot.partition_maxes.len()];
        self.partition_maxes = snapshot.partition_maxes;
        self.floor = snapshot.floor;
    }

    fn detect_idle_partitions(&mut self) {
        let Some(timeout) = self.idle_timeout else {
            return;
        };
        let now = Instant::now();
        for partition in 0..self.is_idle.len() {
            if !self.is_idle[partition]
                && now.duration_since(self.last_active[partition]) >= timeout
            {
                tracing::debug!("partition {partition} idle, excluding from watermark");
                self.is_idle[partition] = true;
            }
        }
    }

    fn floor_watermark(&self) -> Option<Watermark> {
        if self.floor == EVENT_TIME_MIN {
            None
        } else {
            Some(Watermark::new(self.floor))
        }
    }
}
