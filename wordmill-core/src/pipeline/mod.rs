//! The running pipeline: one ingestion worker per partition feeding the
//! shared state store, and a single coordinator that closes windows on
//! watermark advancement and takes checkpoints.
//!
//! # Exactly-once
//! The coordinator checkpoints {offsets, open state, watermarks} as one
//! consistent cut: workers hold the read side of a gate for the span of a
//! micro-batch, and the snapshot takes the write side, so a checkpoint never
//! observes half of a batch. Checkpoints are taken only after the sink has
//! accepted the corresponding closed windows; recovery therefore either
//! resumes past an emitted batch or replays it into an idempotent sink.

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Context, Result};
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::MissedTickBehavior;

use crate::checkpoint::{CheckpointManager, CheckpointStorage};
use crate::config::PipelineConfig;
use crate::decode;
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::retry::retry_with_backoff;
use crate::sink::SinkWriter;
use crate::source::LogSource;
use crate::state::{AggregationStateStore, UpdateOutcome};
use crate::time::WatermarkTracker;
use crate::types::{CheckpointId, Offset, PartitionId, SourceRecord, WindowResult};
use crate::window::{AggregateFunction, SlidingWindows};

/// What a finished run reports back to the operator.
#[derive(Debug, Clone)]
pub struct PipelineSummary {
    pub metrics: MetricsSnapshot,
    pub last_checkpoint: Option<CheckpointId>,
}

enum WorkerSignal {
    /// A micro-batch was fully applied; the watermark may have advanced.
    BatchCompleted { partition: PartitionId },
    /// A bounded partition has no more data, ever.
    PartitionFinished { partition: PartitionId },
    /// The worker hit a fatal error (source retries exhausted).
    WorkerFailed { partition: PartitionId, error: String },
}

/// The streaming aggregation pipeline.
pub struct Pipeline<S: LogSource + 'static, A: AggregateFunction> {
    config: PipelineConfig,
    assigner: SlidingWindows,
    source: Arc<S>,
    sink: Box<dyn SinkWriter>,
    checkpoints: CheckpointManager,
    store: Arc<AggregationStateStore<A>>,
    tracker: Arc<Mutex<WatermarkTracker>>,
    offsets: Arc<Mutex<Vec<Offset>>>,
    metrics: Arc<PipelineMetrics>,
    /// Checkpoint gate: workers read-lock per micro-batch, the snapshot
    /// write-locks, giving every checkpoint a consistent cut.
    gate: Arc<RwLock<()>>,
}

impl<S: LogSource + 'static, A: AggregateFunction> Pipeline<S, A> {
    /// Assemble a pipeline, restoring offsets, open aggregation state, and
    /// watermark progress from the latest checkpoint if one exists.
    pub fn new(
        config: PipelineConfig,
        source: S,
        sink: Box<dyn SinkWriter>,
        storage: Arc<dyn CheckpointStorage>,
        aggregate: A,
    ) -> Result<Self> {
        config.validate()?;
        let partitions = source.num_partitions();
        if partitions == 0 {
            bail!("log source reports zero partitions");
        }

        let checkpoints = CheckpointManager::new(storage);
        let store = Arc::new(AggregationStateStore::new(aggregate));
        let mut tracker = WatermarkTracker::with_idle_timeout(
            partitions,
            config.allowed_lateness,
            config.idle_partition_timeout,
        );
        let mut offsets = vec![0; partitions];

        if let Some(checkpoint) = checkpoints.load_latest()? {
            if checkpoint.offsets.len() != partitions {
                bail!(
                    "checkpoint {} covers {} partitions but the source has {partitions}",
                    checkpoint.checkpoint_id,
                    checkpoint.offsets.len()
                );
            }
            store.restore(&checkpoint.state)?;
            tracker.restore(checkpoint.watermarks);
            offsets = checkpoint.offsets;
            tracing::info!(
                "resuming from checkpoint {} at offsets {offsets:?}",
                checkpoint.checkpoint_id
            );
        }

        let assigner = SlidingWindows::of(config.window_length, config.slide_interval);
        Ok(Self {
            config,
            assigner,
            source: Arc::new(source),
            sink,
            checkpoints,
            store,
            tracker: Arc::new(Mutex::new(tracker)),
            offsets: Arc::new(Mutex::new(offsets)),
            metrics: Arc::new(PipelineMetrics::new()),
            gate: Arc::new(RwLock::new(())),
        })
    }

    /// Shared handle to the pipeline counters.
    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Run until every partition is exhausted or `shutdown` flips to true.
    ///
    /// Both exits flush: closed windows are emitted and a final checkpoint
    /// is committed before returning. Source or sink retry exhaustion and
    /// checkpoint write failures abort the run with an error.
    pub async fn run(mut self, shutdown: watch::Receiver<bool>) -> Result<PipelineSummary> {
        let partitions = self.source.num_partitions();
        let (signal_tx, mut signal_rx) = mpsc::channel(partitions * 2);
        // Internal stop signal: raised when the coordinator exits for any
        // reason (external shutdown, bounded input done, fatal error) so
        // tailing workers stop instead of polling forever.
        let (stop_tx, stop_rx) = watch::channel(false);

        let start_offsets = self
            .offsets
            .lock()
            .map_err(|_| anyhow!("offset table lock poisoned"))?
            .clone();

        let mut workers = Vec::with_capacity(partitions);
        for partition in 0..partitions {
            let ctx = WorkerContext {
                partition,
                start_offset: start_offsets[partition],
                source: Arc::clone(&self.source),
                store: Arc::clone(&self.store),
                tracker: Arc::clone(&self.tracker),
                offsets: Arc::clone(&self.offsets),
                metrics: Arc::clone(&self.metrics),
                assigner: self.assigner,
                gate: Arc::clone(&self.gate),
                config: self.config.clone(),
                signals: signal_tx.clone(),
                stop: stop_rx.clone(),
            };
            workers.push(tokio::spawn(run_worker(ctx)));
        }
        drop(signal_tx);

        let mut shutdown = shutdown;
        let mut checkpoint_timer = tokio::time::interval(self.config.checkpoint_interval);
        checkpoint_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut finished = 0usize;
        let mut dirty = false;
        let mut last_checkpoint = None;
        let mut failure: Option<anyhow::Error> = None;
        let mut shutdown_alive = true;

        loop {
            tokio::select! {
                signal = signal_rx.recv() => {
                    match signal {
                        Some(WorkerSignal::BatchCompleted { .. }) => {
                            dirty = true;
                            match self.close_and_checkpoint(dirty, false).await {
                                Ok(Some(id)) => {
                                    last_checkpoint = Some(id);
                                    dirty = false;
                                }
                                Ok(None) => {}
                                Err(err) => {
                                    failure = Some(err);
                                    break;
                                }
                            }
                        }
                        Some(WorkerSignal::PartitionFinished { partition }) => {
                            finished += 1;
                            tracing::info!(
                                "partition {partition} exhausted ({finished}/{partitions})"
                            );
                            if finished == partitions {
                                break;
                            }
                        }
                        Some(WorkerSignal::WorkerFailed { partition, error }) => {
                            failure =
                                Some(anyhow!("partition {partition} worker failed: {error}"));
                            break;
                        }
                        None => break,
                    }
                }
                _ = checkpoint_timer.tick() => {
                    // Timer path: idle-partition timeouts can advance the
                    // watermark without any batch completing, and offsets
                    // may have moved without closing a window.
                    match self.close_and_checkpoint(dirty, true).await {
                        Ok(Some(id)) => {
                            last_checkpoint = Some(id);
                            dirty = false;
                        }
                        Ok(None) => {}
                        Err(err) => {
                            failure = Some(err);
                            break;
                        }
                    }
                }
                changed = shutdown.changed(), if shutdown_alive => {
                    match changed {
                        Ok(()) if *shutdown.borrow() => {
                            tracing::info!("shutdown requested, flushing");
                            break;
                        }
                        Ok(()) => {}
                        // Sender dropped without a shutdown; stop watching.
                        Err(_) => shutdown_alive = false,
                    }
                }
            }
        }

        // Stop the workers and unblock any parked on a full signal channel.
        let _ = stop_tx.send(true);
        drop(signal_rx);

        if failure.is_none() {
            // Final flush: emit whatever the watermark already covers, then
            // persist the cut so a restart resumes without replaying.
            match self.final_flush().await {
                Ok(id) => last_checkpoint = Some(id),
                Err(err) => failure = Some(err),
            }
        }

        for worker in workers {
            match worker.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    if failure.is_none() {
                        failure = Some(err);
                    }
                }
                Err(err) => {
                    if failure.is_none() {
                        failure = Some(anyhow!("worker task panicked: {err}"));
                    }
                }
            }
        }
        if let Some(err) = failure {
            return Err(err);
        }

        let metrics = self.metrics.snapshot();
        tracing::info!(
            "pipeline stopped: {} decoded, {} rejected, {} late, {} windows emitted",
            metrics.records_decoded,
            metrics.records_rejected,
            metrics.late_events,
            metrics.windows_emitted
        );
        Ok(PipelineSummary {
            metrics,
            last_checkpoint,
        })
    }

    async fn final_flush(&mut self) -> Result<CheckpointId> {
        self.close_ready_windows().await?;
        self.take_checkpoint().await
    }

    /// One coordinator step: close ready windows, then checkpoint if a batch
    /// of windows was emitted (mandatory, checkpoint-after-commit) or if
    /// `checkpoint_if_dirty` and offsets moved since the last checkpoint.
    async fn close_and_checkpoint(
        &mut self,
        dirty: bool,
        checkpoint_if_dirty: bool,
    ) -> Result<Option<CheckpointId>> {
        let emitted = self.close_ready_windows().await?;
        if emitted || (checkpoint_if_dirty && dirty) {
            return Ok(Some(self.take_checkpoint().await?));
        }
        Ok(None)
    }

    /// Drain and emit every window closed at the current watermark.
    /// Returns true if anything was handed to the sink.
    async fn close_ready_windows(&mut self) -> Result<bool> {
        let watermark = self
            .tracker
            .lock()
            .map_err(|_| anyhow!("watermark tracker lock poisoned"))?
            .current_watermark();
        let Some(watermark) = watermark else {
            return Ok(false);
        };

        let drained = self.store.drain_closed(watermark.timestamp)?;
        if drained.is_empty() {
            return Ok(false);
        }

        let mut results = Vec::with_capacity(drained.len());
        for (window, group_key, acc) in drained {
            // Accumulators with nothing to report are omitted entirely.
            if let Some(average_value) = self.store.aggregate().get_result(acc) {
                results.push(WindowResult {
                    window_start: window.start,
                    window_end: window.end,
                    group_key,
                    average_value,
                });
            }
        }
        if results.is_empty() {
            return Ok(false);
        }

        tracing::info!("{watermark} closed {} window aggregates", results.len());
        let sink = &mut self.sink;
        retry_with_backoff(self.config.sink_retry, "sink append", || {
            let outcome = sink.append(&results);
            async move { outcome }
        })
        .await
        .context("sink write failed; checkpoint not advanced")?;

        self.metrics.windows_emitted(results.len() as u64);
        Ok(true)
    }

    /// Snapshot {offsets, state, watermarks} at a quiesced cut and commit it.
    async fn take_checkpoint(&self) -> Result<CheckpointId> {
        let cut = self.gate.write().await;
        let offsets = self
            .offsets
            .lock()
            .map_err(|_| anyhow!("offset table lock poisoned"))?
            .clone();
        let watermarks = self
            .tracker
            .lock()
            .map_err(|_| anyhow!("watermark tracker lock poisoned"))?
            .snapshot();
        let state = self.store.snapshot()?;
        drop(cut);

        let checkpoint_id = self
            .checkpoints
            .commit(offsets, watermarks, state)
            .context("checkpoint write failed")?;
        self.metrics.checkpoint_completed();
        Ok(checkpoint_id)
    }
}

// ── Ingestion workers ─────────────────────────────────────────────────────────

struct WorkerContext<S, A: AggregateFunction> {
    partition: PartitionId,
    start_offset: Offset,
    source: Arc<S>,
    store: Arc<AggregationStateStore<A>>,
    tracker: Arc<Mutex<WatermarkTracker>>,
    offsets: Arc<Mutex<Vec<Offset>>>,
    metrics: Arc<PipelineMetrics>,
    assigner: SlidingWindows,
    gate: Arc<RwLock<()>>,
    config: PipelineConfig,
    signals: mpsc::Sender<WorkerSignal>,
    stop: watch::Receiver<bool>,
}

async fn run_worker<S: LogSource + 'static, A: AggregateFunction>(
    ctx: WorkerContext<S, A>,
) -> Result<()> {
    let partition = ctx.partition;
    let signals = ctx.signals.clone();
    match partition_worker(ctx).await {
        Ok(()) => Ok(()),
        Err(err) => {
            tracing::error!("partition {partition} worker failed: {err:#}");
            let _ = signals
                .send(WorkerSignal::WorkerFailed {
                    partition,
                    error: format!("{err:#}"),
                })
                .await;
            Err(err)
        }
    }
}

async fn partition_worker<S: LogSource + 'static, A: AggregateFunction>(
    ctx: WorkerContext<S, A>,
) -> Result<()> {
    let partition = ctx.partition;
    let mut offset = ctx.start_offset;

    loop {
        if *ctx.stop.borrow() {
            return Ok(());
        }

        // Backpressure: stop reading while the store is over its bound.
        while ctx.store.open_window_count() >= ctx.config.open_window_memory_bound {
            if *ctx.stop.borrow() {
                return Ok(());
            }
            tokio::time::sleep(ctx.config.poll_interval).await;
        }

        let source = Arc::clone(&ctx.source);
        let max_records = ctx.config.max_batch_size;
        let batch = retry_with_backoff(ctx.config.source_retry, "log source read", || {
            let source = Arc::clone(&source);
            async move { source.read_from(partition, offset, max_records) }
        })
        .await?;

        if batch.records.is_empty() {
            if batch.end_of_partition {
                let _ = ctx
                    .signals
                    .send(WorkerSignal::PartitionFinished { partition })
                    .await;
                return Ok(());
            }
            tokio::time::sleep(ctx.config.poll_interval).await;
            continue;
        }

        {
            // Read side of the checkpoint gate for the whole batch: a
            // snapshot sees all of this batch's updates and its offset, or
            // none of them.
            let _cut = ctx.gate.read().await;
            for record in &batch.records {
                apply_record(&ctx, record)?;
            }
            let mut offsets = ctx
                .offsets
                .lock()
                .map_err(|_| anyhow!("offset table lock poisoned"))?;
            offsets[partition] = batch.next_offset;
        }
        offset = batch.next_offset;

        if ctx
            .signals
            .send(WorkerSignal::BatchCompleted { partition })
            .await
            .is_err()
        {
            // Coordinator stopped listening; the run is over.
            return Ok(());
        }
    }
}

/// Decode one record and fold it into every window it belongs to.
fn apply_record<S, A: AggregateFunction>(
    ctx: &WorkerContext<S, A>,
    record: &SourceRecord,
) -> Result<()> {
    let event = match decode::decode(record) {
        Ok(event) => event,
        Err(err) => {
            ctx.metrics.record_rejected();
            tracing::warn!(
                "partition {} offset {}: dropping record: {err:#}",
                record.partition,
                record.offset
            );
            return Ok(());
        }
    };
    ctx.metrics.record_decoded();

    ctx.tracker
        .lock()
        .map_err(|_| anyhow!("watermark tracker lock poisoned"))?
        .observe(ctx.partition, event.event_time);

    let mut hit_drained_window = false;
    for window in ctx.assigner.assign_windows(event.event_time) {
        match ctx.store.update(window, &event.group_key, event.value)? {
            UpdateOutcome::Applied => {}
            UpdateOutcome::LateWindow => hit_drained_window = true,
        }
    }
    if hit_drained_window {
        ctx.metrics.late_event();
        tracing::debug!(
            "late event for {:?} at {}ms dropped from already-closed windows",
            event.group_key,
            event.event_time
        );
    }
    Ok(())
}
