use super::*;

/// Assigns checkpoint ids, commits snapshots, and garbage-collects
/// superseded checkpoints.
pub struct CheckpointManager {
    storage: Arc<dyn CheckpointStorage>,
    next_checkpoint_id: AtomicU64,
    retained_checkpoints: usize,
}

impl CheckpointManager {
    pub fn new(storage: Arc<dyn CheckpointStorage>) -> Self {
        Self {
            storage,
            next_checkpoint_id: AtomicU64::new(1),
            retained_checkpoints: 3,
        }
    }

    pub fn with_retained_checkpoints(mut self, retained_checkpoints: usize) -> Self {
        self.retained_checkpoints = retained_checkpoints.max(1);
        self
    }

    /// Load the latest durable checkpoint and position the id counter after
    /// it. Returns `None` on a fresh start.
    pub fn load_latest(&self) -> Result<Option<Checkpoint>> {
        let checkpoint = self.storage.load_latest()?;
        if let Some(checkpoint) = &checkpoint {
            self.next_checkpoint_id
                .store(checkpoint.checkpoint_id + 1, Ordering::SeqCst);
        }
        Ok(checkpoint)
    }

    /// Durably persist one consistent cut of the pipeline. A failure here is
    /// fatal to the caller: the pipeline must not continue past offsets that
    /// were never committed.
    pub fn commit(
        &self,
        offsets: Vec<Offset>,
        watermarks: WatermarkSnapshot,
        state: Vec<u8>,
    ) -> Result<CheckpointId> {
        let checkpoint_id = self.next_checkpoint_id.fetch_add(1, Ordering::SeqCst);
        let checkpoint = Checkpoint {
            checkpoint_id,
            offsets,
            watermarks,
            state,
        };
        self.storage
            .save(&checkpoint)
            .with_context(|| format!("persist checkpoint {checkpoint_id}"))?;
        self.storage.purge(self.retained_checkpoints)?;
        tracing::debug!("checkpoint {checkpoint_id} committed");
        Ok(checkpoint_id)
    }
}
