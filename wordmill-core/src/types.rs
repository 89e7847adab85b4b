use serde::{Deserialize, Serialize};

/// Event time in milliseconds since epoch.
pub type EventTime = i64;

/// Zero-based index of an ingestion partition.
pub type PartitionId = usize;

/// Position within a partition's append-only record sequence.
pub type Offset = u64;

/// Unique identifier for committed checkpoints.
pub type CheckpointId = u64;

/// Minimum possible event time. Used as the "nothing observed yet" sentinel.
pub const EVENT_TIME_MIN: EventTime = i64::MIN;

/// A raw record as delivered by the ingestion log, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub payload: Vec<u8>,
    pub partition: PartitionId,
    pub offset: Offset,
    /// Wall-clock time the record became visible to this process.
    pub arrival_time: EventTime,
}

/// A decoded article measurement flowing through the aggregation pipeline.
///
/// The pipeline treats `value` as an opaque numeric measure; for wordmill it
/// is the article's content word count.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArticleEvent {
    /// Grouping key (the article's author).
    pub group_key: String,
    /// Publish time of the article, in milliseconds since epoch.
    pub event_time: EventTime,
    /// The aggregated measure (word count).
    pub value: f64,
}

/// Watermark indicates that no elements with timestamp <= this value are
/// expected to arrive anymore.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Watermark {
    pub timestamp: EventTime,
}

impl Watermark {
    /// Create a new watermark at the given timestamp.
    pub fn new(timestamp: EventTime) -> Self {
        Self { timestamp }
    }
}

impl std::fmt::Display for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Watermark({}ms)", self.timestamp)
    }
}

/// A finalized window aggregate, ready for the sink.
///
/// Keyed by (window_start, window_end, group_key); sinks must treat rows with
/// the same key as overwrites so replay after recovery stays idempotent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WindowResult {
    pub window_start: EventTime,
    pub window_end: EventTime,
    pub group_key: String,
    pub average_value: f64,
}
