//! Output-side collaborator: durable storage for finalized windows.
//!
//! Writes must be idempotent keyed by (window, group_key): after a crash
//! between a sink commit and the following checkpoint, recovery replays the
//! same finalized windows and the sink must absorb the duplicates.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::types::{EventTime, WindowResult};

/// Receives batches of finalized window records for durable append.
pub trait SinkWriter: Send {
    fn append(&mut self, batch: &[WindowResult]) -> Result<()>;
}

// ── Collecting sink ───────────────────────────────────────────────────────────

/// Test sink that collects every appended record in memory. The handle stays
/// valid after the pipeline consumes the sink itself.
#[derive(Default)]
pub struct CollectingSink {
    results: Arc<Mutex<Vec<WindowResult>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared view of everything appended so far.
    pub fn handle(&self) -> Arc<Mutex<Vec<WindowResult>>> {
        Arc::clone(&self.results)
    }
}

impl SinkWriter for CollectingSink {
    fn append(&mut self, batch: &[WindowResult]) -> Result<()> {
        self.results
            .lock()
            .map_err(|_| anyhow!("collecting sink lock poisoned"))?
            .extend_from_slice(batch);
        Ok(())
    }
}

// ── JSON-lines sink ───────────────────────────────────────────────────────────

/// On-disk representation: window bounds as RFC 3339 for human consumption.
#[derive(Debug, Serialize, Deserialize)]
struct EmittedRecord {
    window_start: String,
    window_end: String,
    group_key: String,
    average_value: f64,
}

/// Appends finalized windows to an NDJSON file, one record per line.
///
/// Idempotence: the sink remembers every (window, key) already present in
/// the file (loaded once at open) and silently skips re-appends, so a replay
/// after recovery cannot produce duplicate rows.
pub struct JsonLinesSink {
    path: PathBuf,
    written: HashSet<(EventTime, EventTime, String)>,
}

impl JsonLinesSink {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut written = HashSet::new();
        match File::open(&path) {
            Ok(file) => {
                for line in BufReader::new(file).lines() {
                    let line = line.with_context(|| format!("read {}", path.display()))?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    let record: EmittedRecord = serde_json::from_str(&line)
                        .with_context(|| format!("corrupt sink file {}", path.display()))?;
                    written.insert((
                        parse_rfc3339_millis(&record.window_start)?,
                        parse_rfc3339_millis(&record.window_end)?,
                        record.group_key,
                    ));
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| format!("open sink file {}", path.display()))
            }
        }
        Ok(Self { path, written })
    }
}

impl SinkWriter for JsonLinesSink {
    fn append(&mut self, batch: &[WindowResult]) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open sink file {}", self.path.display()))?;
        for result in batch {
            let key = (
                result.window_start,
                result.window_end,
                result.group_key.clone(),
            );
            if self.written.contains(&key) {
                continue;
            }
            let record = EmittedRecord {
                window_start: format_rfc3339_millis(result.window_start)?,
                window_end: format_rfc3339_millis(result.window_end)?,
                group_key: result.group_key.clone(),
                average_value: result.average_value,
            };
            let line = serde_json::to_string(&record).context("serialize window record")?;
            writeln!(file, "{line}")
                .with_context(|| format!("append to sink file {}", self.path.display()))?;
            self.written.insert(key);
        }
        file.flush().context("flush sink file")
    }
}

fn format_rfc3339_millis(millis: EventTime) -> Result<String> {
    let ts = DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| anyhow!("timestamp {millis}ms out of range"))?;
    Ok(ts.to_rfc3339())
}

fn parse_rfc3339_millis(raw: &str) -> Result<EventTime> {
    let ts = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("unparseable sink timestamp {raw:?}"))?;
    Ok(ts.timestamp_millis())
}
