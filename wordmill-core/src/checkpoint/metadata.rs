use super::*;

/// One durable checkpoint: everything needed to resume the pipeline without
/// double-counting an event.
///
/// The three parts are captured at a single quiesced cut: offsets cover
/// exactly the events already folded into `state`, and `watermarks` is the
/// tracker position at that same instant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub checkpoint_id: CheckpointId,
    /// Next offset to read, per partition.
    pub offsets: Vec<Offset>,
    /// Per-partition event-time maxima plus the watermark floor.
    pub watermarks: WatermarkSnapshot,
    /// Serialized open aggregation state (see `AggregationStateStore`).
    pub state: Vec<u8>,
}
