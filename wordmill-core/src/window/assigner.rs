use super::*;

/// Fixed-size, overlapping event-time windows starting at every multiple of
/// the slide interval. An event belongs to `ceil(length / slide)` windows.
///
/// Assignment is a pure function of the timestamp; the assigner holds no
/// state and is freely cloneable into every ingestion worker.
#[derive(Debug, Clone, Copy)]
pub struct SlidingWindows {
    length_ms: i64,
    slide_ms: i64,
}

impl SlidingWindows {
    /// Create sliding windows of the given `length` advancing every `slide`.
    pub fn of(length: Duration, slide: Duration) -> Self {
        Self {
            length_ms: length.as_millis() as i64,
            slide_ms: slide.as_millis() as i64,
        }
    }

    /// Return the windows whose `[start, end)` interval contains `timestamp`,
    /// latest start first.
    ///
    /// A timestamp exactly on a slide boundary belongs to the window starting
    /// there, not the one ending there.
    pub fn assign_windows(&self, timestamp: EventTime) -> Vec<TimeWindow> {
        // Walk back from the last covering start by one slide at a time,
        // mirroring Flink's sliding assigner.
        let last_start = timestamp - timestamp.rem_euclid(self.slide_ms);
        let mut windows = Vec::with_capacity((self.length_ms / self.slide_ms) as usize + 1);
        let mut start = last_start;
        while start > timestamp - self.length_ms {
            windows.push(TimeWindow::new(start, start + self.length_ms));
            start -= self.slide_ms;
        }
        windows
    }
}
