use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use wordmill_core::checkpoint::{CheckpointStorage, FsCheckpointStorage};
use wordmill_core::config::PipelineConfig;
use wordmill_core::pipeline::Pipeline;
use wordmill_core::sink::JsonLinesSink;
use wordmill_core::source::FileLogSource;
use wordmill_core::window::AverageAggregate;

#[derive(Parser, Debug)]
#[command(name = "wordmill")]
#[command(about = "Sliding-window average word counts over an article log", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the aggregation pipeline against a partitioned NDJSON log.
    Run {
        /// Directory containing partition-<n>.ndjson log files.
        #[arg(long)]
        source_dir: PathBuf,
        /// Output NDJSON file of finalized window aggregates.
        #[arg(long)]
        sink_path: PathBuf,
        /// Directory for checkpoint files.
        #[arg(long)]
        checkpoint_dir: PathBuf,
        /// Keep tailing the log instead of stopping at end of input.
        #[arg(long)]
        follow: bool,
        /// Override WORDMILL_WINDOW_LENGTH.
        #[arg(long, value_parser = humantime::parse_duration)]
        window_length: Option<Duration>,
        /// Override WORDMILL_SLIDE_INTERVAL.
        #[arg(long, value_parser = humantime::parse_duration)]
        slide_interval: Option<Duration>,
        /// Override WORDMILL_ALLOWED_LATENESS.
        #[arg(long, value_parser = humantime::parse_duration)]
        allowed_lateness: Option<Duration>,
    },
    /// List checkpoints in a checkpoint directory.
    Checkpoints {
        #[arg(long)]
        checkpoint_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    match Cli::parse().command {
        Commands::Run {
            source_dir,
            sink_path,
            checkpoint_dir,
            follow,
            window_length,
            slide_interval,
            allowed_lateness,
        } => {
            let mut config = PipelineConfig::from_env()?;
            if let Some(value) = window_length {
                config.window_length = value;
            }
            if let Some(value) = slide_interval {
                config.slide_interval = value;
            }
            if let Some(value) = allowed_lateness {
                config.allowed_lateness = value;
            }

            let source = FileLogSource::open(&source_dir, follow)
                .with_context(|| format!("open log directory {}", source_dir.display()))?;
            let sink = JsonLinesSink::open(&sink_path)
                .with_context(|| format!("open sink file {}", sink_path.display()))?;
            let storage: Arc<dyn CheckpointStorage> =
                Arc::new(FsCheckpointStorage::new(&checkpoint_dir)?);

            let pipeline =
                Pipeline::new(config, source, Box::new(sink), storage, AverageAggregate)?;

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("ctrl-c received, shutting down");
                    let _ = shutdown_tx.send(true);
                }
            });

            let summary = pipeline.run(shutdown_rx).await?;
            tracing::info!(
                "done: {} windows emitted, last checkpoint {:?}",
                summary.metrics.windows_emitted,
                summary.last_checkpoint
            );
            Ok(())
        }
        Commands::Checkpoints { checkpoint_dir } => {
            let storage = FsCheckpointStorage::new(&checkpoint_dir)?;
            let ids = storage.list()?;
            if ids.is_empty() {
                println!("no checkpoints in {}", checkpoint_dir.display());
                return Ok(());
            }
            for id in ids {
                let checkpoint = storage.load(id)?;
                println!(
                    "chk-{id}: offsets {:?}, watermark floor {}ms",
                    checkpoint.offsets, checkpoint.watermarks.floor
                );
            }
            Ok(())
        }
    }
}
