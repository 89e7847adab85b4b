//! Ingestion-side collaborator: a partitioned append-only log.
//!
//! The pipeline needs only `read_from(offset)` / `current_offset()` semantics
//! with at-least-once, ordered-per-partition delivery; everything else about
//! the log (Kinesis, NATS, files) stays behind this trait.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, bail, Context, Result};

use crate::time::now_millis;
use crate::types::{Offset, PartitionId, SourceRecord};

/// One micro-batch read from a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadBatch {
    pub records: Vec<SourceRecord>,
    /// Offset to resume from after this batch.
    pub next_offset: Offset,
    /// True once the partition is exhausted and will receive no more data
    /// (bounded sources only; a tailing source never sets this).
    pub end_of_partition: bool,
}

/// A partitioned, replayable record log.
pub trait LogSource: Send + Sync {
    fn num_partitions(&self) -> usize;

    /// Read up to `max_records` starting at `offset`. An empty batch means
    /// no data is currently available at that position.
    fn read_from(
        &self,
        partition: PartitionId,
        offset: Offset,
        max_records: usize,
    ) -> Result<ReadBatch>;

    /// The offset one past the last record currently in the partition.
    fn current_offset(&self, partition: PartitionId) -> Result<Offset>;
}

// ── In-memory source ──────────────────────────────────────────────────────────

/// In-memory log, used by tests and local experiments. Payloads can be
/// appended while the pipeline runs to simulate a live stream.
#[derive(Default)]
pub struct MemoryLogSource {
    partitions: Vec<Mutex<Vec<Vec<u8>>>>,
    /// Tailing sources never report end-of-partition, like a live stream.
    tailing: bool,
}

impl MemoryLogSource {
    /// Build a bounded source from per-partition payload lists.
    pub fn new(partitions: Vec<Vec<Vec<u8>>>) -> Self {
        Self {
            partitions: partitions.into_iter().map(Mutex::new).collect(),
            tailing: false,
        }
    }

    /// Build a source that keeps waiting for appends instead of ending.
    pub fn tailing(partitions: Vec<Vec<Vec<u8>>>) -> Self {
        Self {
            tailing: true,
            ..Self::new(partitions)
        }
    }

    pub fn append(&self, partition: PartitionId, payload: Vec<u8>) -> Result<()> {
        self.partition(partition)?
            .lock()
            .map_err(|_| anyhow!("memory log partition lock poisoned"))?
            .push(payload);
        Ok(())
    }

    fn partition(&self, partition: PartitionId) -> Result<&Mutex<Vec<Vec<u8>>>> {
        self.partitions
            .get(partition)
            .ok_or_else(|| anyhow!("partition {partition} out of range"))
    }
}

impl LogSource for MemoryLogSource {
    fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    fn read_from(
        &self,
        partition: PartitionId,
        offset: Offset,
        max_records: usize,
    ) -> Result<ReadBatch> {
        let payloads = self
            .partition(partition)?
            .lock()
            .map_err(|_| anyhow!("memory log partition lock poisoned"))?;
        let start = (offset as usize).min(payloads.len());
        let end = (start + max_records).min(payloads.len());
        let records = payloads[start..end]
            .iter()
            .enumerate()
            .map(|(i, payload)| SourceRecord {
                payload: payload.clone(),
                partition,
                offset: (start + i) as Offset,
                arrival_time: now_millis(),
            })
            .collect();
        Ok(ReadBatch {
            records,
            next_offset: end as Offset,
            end_of_partition: !self.tailing && end == payloads.len(),
        })
    }

    fn current_offset(&self, partition: PartitionId) -> Result<Offset> {
        let payloads = self
            .partition(partition)?
            .lock()
            .map_err(|_| anyhow!("memory log partition lock poisoned"))?;
        Ok(payloads.len() as Offset)
    }
}

// ── File-backed source ────────────────────────────────────────────────────────

/// A directory of `partition-<n>.ndjson` files acting as a partitioned log.
/// The offset is the zero-based line index within the partition file.
pub struct FileLogSource {
    dir: PathBuf,
    partitions: usize,
    /// When true the source never reports end-of-partition: files are
    /// expected to keep growing (tail mode).
    follow: bool,
}

impl FileLogSource {
    /// Open a log directory, discovering `partition-<n>.ndjson` files. The
    /// files must be contiguously numbered from zero.
    pub fn open(dir: impl Into<PathBuf>, follow: bool) -> Result<Self> {
        let dir = dir.into();
        let mut partitions = 0;
        while Self::partition_path(&dir, partitions).exists() {
            partitions += 1;
        }
        if partitions == 0 {
            bail!(
                "no partition-<n>.ndjson files found in {}",
                dir.display()
            );
        }
        Ok(Self {
            dir,
            partitions,
            follow,
        })
    }

    fn partition_path(dir: &Path, partition: PartitionId) -> PathBuf {
        dir.join(format!("partition-{partition}.ndjson"))
    }
}

impl LogSource for FileLogSource {
    fn num_partitions(&self) -> usize {
        self.partitions
    }

    fn read_from(
        &self,
        partition: PartitionId,
        offset: Offset,
        max_records: usize,
    ) -> Result<ReadBatch> {
        if partition >= self.partitions {
            bail!("partition {partition} out of range");
        }
        let path = Self::partition_path(&self.dir, partition);
        let file = File::open(&path)
            .with_context(|| format!("open log partition {}", path.display()))?;
        let reader = BufReader::new(file);

        let mut records = Vec::new();
        let mut next_offset = offset;
        let mut exhausted = true;
        for (index, line) in reader.lines().enumerate().skip(offset as usize) {
            if records.len() >= max_records {
                exhausted = false;
                break;
            }
            let line = line.with_context(|| format!("read {}", path.display()))?;
            if line.trim().is_empty() {
                next_offset = index as Offset + 1;
                continue;
            }
            records.push(SourceRecord {
                payload: line.into_bytes(),
                partition,
                offset: index as Offset,
                arrival_time: now_millis(),
            });
            next_offset = index as Offset + 1;
        }
        Ok(ReadBatch {
            records,
            next_offset,
            end_of_partition: exhausted && !self.follow,
        })
    }

    fn current_offset(&self, partition: PartitionId) -> Result<Offset> {
        if partition >= self.partitions {
            bail!("partition {partition} out of range");
        }
        let path = Self::partition_path(&self.dir, partition);
        let file = File::open(&path)
            .with_context(|| format!("open log partition {}", path.display()))?;
        Ok(BufReader::new(file).lines().count() as Offset)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;

    #[test]
    fn test_memory_source_batches_and_ends() {
        let source = MemoryLogSource::new(vec![vec![
            b"a".to_vec(),
            b"b".to_vec(),
            b"c".to_vec(),
        ]]);
        let batch = source.read_from(0, 0, 2).unwrap();
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.next_offset, 2);
        assert!(!batch.end_of_partition);

        let batch = source.read_from(0, 2, 2).unwrap();
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].offset, 2);
        assert!(batch.end_of_partition);

        assert_eq!(source.current_offset(0).unwrap(), 3);
    }

    #[test]
    fn test_memory_source_append_extends_partition() {
        let source = MemoryLogSource::new(vec![vec![]]);
        assert!(source.read_from(0, 0, 10).unwrap().records.is_empty());
        source.append(0, b"x".to_vec()).unwrap();
        let batch = source.read_from(0, 0, 10).unwrap();
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].payload, b"x");
    }

    #[test]
    fn test_memory_source_rejects_unknown_partition() {
        let source = MemoryLogSource::new(vec![vec![]]);
        assert!(source.read_from(1, 0, 1).is_err());
    }

    fn unique_temp_dir(prefix: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("wordmill-{prefix}-{}-{nanos}", std::process::id()))
    }

    #[test]
    fn test_file_source_reads_lines_as_offsets() {
        let dir = unique_temp_dir("file-source");
        std::fs::create_dir_all(&dir).unwrap();
        let mut f = File::create(dir.join("partition-0.ndjson")).unwrap();
        writeln!(f, "{{\"n\":1}}").unwrap();
        writeln!(f, "{{\"n\":2}}").unwrap();
        writeln!(f, "{{\"n\":3}}").unwrap();

        let source = FileLogSource::open(&dir, false).unwrap();
        assert_eq!(source.num_partitions(), 1);
        assert_eq!(source.current_offset(0).unwrap(), 3);

        let batch = source.read_from(0, 1, 10).unwrap();
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.records[0].offset, 1);
        assert_eq!(batch.records[0].payload, b"{\"n\":2}");
        assert!(batch.end_of_partition);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_file_source_follow_never_ends() {
        let dir = unique_temp_dir("file-source-follow");
        std::fs::create_dir_all(&dir).unwrap();
        File::create(dir.join("partition-0.ndjson")).unwrap();

        let source = FileLogSource::open(&dir, true).unwrap();
        let batch = source.read_from(0, 0, 10).unwrap();
        assert!(batch.records.is_empty());
        assert!(!batch.end_of_partition);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_file_source_requires_partition_files() {
        let dir = unique_temp_dir("file-source-empty");
        std::fs::create_dir_all(&dir).unwrap();
        assert!(FileLogSource::open(&dir, false).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
