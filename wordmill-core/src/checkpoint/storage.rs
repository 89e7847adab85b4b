use super::*;

/// Durable storage for checkpoints.
pub trait CheckpointStorage: Send + Sync {
    /// Persist a checkpoint. Must be atomic: a crash mid-save leaves either
    /// the previous checkpoint set or the new one, never a torn file.
    fn save(&self, checkpoint: &Checkpoint) -> Result<()>;
    fn load(&self, checkpoint_id: CheckpointId) -> Result<Checkpoint>;
    fn list(&self) -> Result<Vec<CheckpointId>>;
    fn purge(&self, keep_last_n: usize) -> Result<()>;

    /// Load the most recent checkpoint, or `None` on a fresh start.
    fn load_latest(&self) -> Result<Option<Checkpoint>> {
        match self.list()?.last() {
            Some(id) => Ok(Some(self.load(*id)?)),
            None => Ok(None),
        }
    }
}

/// In-memory checkpoint storage for tests and single-process experiments.
#[derive(Default)]
pub struct InMemoryCheckpointStorage {
    checkpoints: Mutex<HashMap<CheckpointId, Checkpoint>>,
}

impl InMemoryCheckpointStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStorage for InMemoryCheckpointStorage {
    fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.checkpoints
            .lock()
            .map_err(|_| anyhow!("checkpoint map lock poisoned"))?
            .insert(checkpoint.checkpoint_id, checkpoint.clone());
        Ok(())
    }

    fn load(&self, checkpoint_id: CheckpointId) -> Result<Checkpoint> {
        self.checkpoints
            .lock()
            .map_err(|_| anyhow!("checkpoint map lock poisoned"))?
            .get(&checkpoint_id)
            .cloned()
            .ok_or_else(|| anyhow!("checkpoint {checkpoint_id} not found"))
    }

    fn list(&self) -> Result<Vec<CheckpointId>> {
        let mut ids: Vec<_> = self
            .checkpoints
            .lock()
            .map_err(|_| anyhow!("checkpoint map lock poisoned"))?
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn purge(&self, keep_last_n: usize) -> Result<()> {
        let mut ids = self.list()?;
        if ids.len() <= keep_last_n {
            return Ok(());
        }
        let purge_count = ids.len() - keep_last_n;
        ids.truncate(purge_count);
        let mut guard = self
            .checkpoints
            .lock()
            .map_err(|_| anyhow!("checkpoint map lock poisoned"))?;
        for checkpoint_id in ids {
            guard.remove(&checkpoint_id);
        }
        Ok(())
    }
}

/// File-system checkpoint storage: one `chk-<id>.bin` per checkpoint,
/// written to a temp file and renamed so saves are atomic.
pub struct FsCheckpointStorage {
    base_path: PathBuf,
}

impl FsCheckpointStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).with_context(|| {
            format!(
                "failed to create checkpoint directory {}",
                base_path.display()
            )
        })?;
        Ok(Self { base_path })
    }

    fn checkpoint_path(&self, checkpoint_id: CheckpointId) -> PathBuf {
        self.base_path.join(format!("chk-{checkpoint_id}.bin"))
    }
}

impl CheckpointStorage for FsCheckpointStorage {
    fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let bytes = bincode::serialize(checkpoint).context("serialize checkpoint failed")?;
        let final_path = self.checkpoint_path(checkpoint.checkpoint_id);
        let tmp_path = final_path.with_extension("bin.tmp");
        fs::write(&tmp_path, bytes)
            .with_context(|| format!("write checkpoint temp file {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &final_path)
            .with_context(|| format!("commit checkpoint file {}", final_path.display()))
    }

    fn load(&self, checkpoint_id: CheckpointId) -> Result<Checkpoint> {
        let path = self.checkpoint_path(checkpoint_id);
        let bytes =
            fs::read(&path).with_context(|| format!("read checkpoint {}", path.display()))?;
        bincode::deserialize(&bytes).context("deserialize checkpoint failed")
    }

    fn list(&self) -> Result<Vec<CheckpointId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.base_path)
            .with_context(|| format!("read_dir failed for {}", self.base_path.display()))?
        {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(id_part) = name.strip_prefix("chk-").and_then(|n| n.strip_suffix(".bin"))
            {
                if let Ok(id) = id_part.parse::<CheckpointId>() {
                    ids.push(id);
                }
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    fn purge(&self, keep_last_n: usize) -> Result<()> {
        let ids = self.list()?;
        if ids.len() <= keep_last_n {
            return Ok(());
        }
        let purge_count = ids.len() - keep_last_n;
        for checkpoint_id in ids.into_iter().take(purge_count) {
            let path = self.checkpoint_path(checkpoint_id);
            fs::remove_file(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
        }
        Ok(())
    }
}
