//! Event-time progress tracking.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::types::{EventTime, PartitionId, Watermark, EVENT_TIME_MIN};

mod tracker;

pub use tracker::*;

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> EventTime {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as EventTime)
        .unwrap_or(0)
}

#[cfg(test)]
#[path = "tests/time_tests.rs"]
mod tests;
