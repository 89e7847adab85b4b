use super::*;

// ── AggregateFunction ─────────────────────────────────────────────────────────

/// Incremental aggregation over a window's values.
///
/// The accumulator is folded on each incoming value, so only `O(1)` state is
/// kept per (window, key) pair. Accumulators must serialize so open windows
/// survive checkpoints.
///
/// `get_result` returns `None` when the accumulator has nothing to report
/// (e.g. zero contributing events); such windows are omitted from the output
/// rather than emitted with an undefined value.
pub trait AggregateFunction: Send + Sync + 'static {
    type Acc: Clone + Send + Serialize + DeserializeOwned + 'static;

    /// Create a fresh accumulator for a new (window, key) pair.
    fn create_accumulator(&self) -> Self::Acc;

    /// Fold one value into the accumulator.
    fn add(&self, acc: &mut Self::Acc, value: f64);

    /// Merge two accumulators for the same (window, key) pair.
    fn merge(&self, acc: &mut Self::Acc, other: Self::Acc);

    /// Convert the final accumulator into the window result.
    fn get_result(&self, acc: Self::Acc) -> Option<f64>;
}

// ── Average ───────────────────────────────────────────────────────────────────

/// Running (count, sum) pair; the average is computed only at emission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialAggregate {
    pub count: u64,
    pub sum: f64,
}

/// Average of all values in the window: the wordmill aggregate
/// (average word count per author).
#[derive(Debug, Clone, Copy, Default)]
pub struct AverageAggregate;

impl AggregateFunction for AverageAggregate {
    type Acc = PartialAggregate;

    fn create_accumulator(&self) -> PartialAggregate {
        PartialAggregate::default()
    }

    fn add(&self, acc: &mut PartialAggregate, value: f64) {
        acc.count += 1;
        acc.sum += value;
    }

    fn merge(&self, acc: &mut PartialAggregate, other: PartialAggregate) {
        acc.count += other.count;
        acc.sum += other.sum;
    }

    fn get_result(&self, acc: PartialAggregate) -> Option<f64> {
        if acc.count == 0 {
            None
        } else {
            Some(acc.sum / acc.count as f64)
        }
    }
}
