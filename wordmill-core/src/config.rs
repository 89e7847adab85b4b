//! Pipeline configuration, environment-style.
//!
//! Every duration option accepts humantime syntax (`5m`, `90s`, `250ms`).

use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::retry::RetryPolicy;

const ENV_WINDOW_LENGTH: &str = "WORDMILL_WINDOW_LENGTH";
const ENV_SLIDE_INTERVAL: &str = "WORDMILL_SLIDE_INTERVAL";
const ENV_ALLOWED_LATENESS: &str = "WORDMILL_ALLOWED_LATENESS";
const ENV_IDLE_PARTITION_TIMEOUT: &str = "WORDMILL_IDLE_PARTITION_TIMEOUT";
const ENV_CHECKPOINT_INTERVAL: &str = "WORDMILL_CHECKPOINT_INTERVAL";
const ENV_OPEN_WINDOW_MEMORY_BOUND: &str = "WORDMILL_OPEN_WINDOW_MEMORY_BOUND";

/// Tuning knobs for the aggregation pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Length of each sliding window. Default: 5 minutes.
    pub window_length: Duration,
    /// Interval at which new windows start. Default: 1 minute.
    pub slide_interval: Duration,
    /// Bounded out-of-order tolerance; the watermark lags the max seen
    /// event time by this much. Default: 10 seconds.
    pub allowed_lateness: Duration,
    /// A partition quiet for longer than this stops blocking the global
    /// watermark until it produces again. Default: 60 seconds.
    pub idle_partition_timeout: Duration,
    /// Timer-driven checkpoint cadence for stretches without window
    /// closures. Default: 30 seconds.
    pub checkpoint_interval: Duration,
    /// Ingestion pauses while more than this many (window, key) accumulators
    /// are open. Default: 100_000.
    pub open_window_memory_bound: usize,
    /// Max records pulled from a partition per micro-batch.
    pub max_batch_size: usize,
    /// How long an ingestion worker sleeps when its partition has no data.
    pub poll_interval: Duration,
    /// Retry policy for log source reads.
    pub source_retry: RetryPolicy,
    /// Retry policy for sink appends.
    pub sink_retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_length: Duration::from_secs(5 * 60),
            slide_interval: Duration::from_secs(60),
            allowed_lateness: Duration::from_secs(10),
            idle_partition_timeout: Duration::from_secs(60),
            checkpoint_interval: Duration::from_secs(30),
            open_window_memory_bound: 100_000,
            max_batch_size: 256,
            poll_interval: Duration::from_millis(100),
            source_retry: RetryPolicy::default(),
            sink_retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Build a configuration from `WORDMILL_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(value) = env_duration(ENV_WINDOW_LENGTH)? {
            config.window_length = value;
        }
        if let Some(value) = env_duration(ENV_SLIDE_INTERVAL)? {
            config.slide_interval = value;
        }
        if let Some(value) = env_duration(ENV_ALLOWED_LATENESS)? {
            config.allowed_lateness = value;
        }
        if let Some(value) = env_duration(ENV_IDLE_PARTITION_TIMEOUT)? {
            config.idle_partition_timeout = value;
        }
        if let Some(value) = env_duration(ENV_CHECKPOINT_INTERVAL)? {
            config.checkpoint_interval = value;
        }
        if let Ok(raw) = std::env::var(ENV_OPEN_WINDOW_MEMORY_BOUND) {
            config.open_window_memory_bound = raw
                .parse()
                .with_context(|| format!("invalid {ENV_OPEN_WINDOW_MEMORY_BOUND}: {raw:?}"))?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.slide_interval.is_zero() {
            bail!("slide_interval must be non-zero");
        }
        if self.window_length < self.slide_interval {
            bail!(
                "window_length ({:?}) must be at least slide_interval ({:?})",
                self.window_length,
                self.slide_interval
            );
        }
        if self.open_window_memory_bound == 0 {
            bail!("open_window_memory_bound must be non-zero");
        }
        if self.max_batch_size == 0 {
            bail!("max_batch_size must be non-zero");
        }
        Ok(())
    }
}

fn env_duration(name: &str) -> Result<Option<Duration>> {
    match std::env::var(name) {
        Ok(raw) => {
            let parsed = humantime::parse_duration(&raw)
                .with_context(|| format!("invalid {name}: {raw:?}"))?;
            Ok(Some(parsed))
        }
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.window_length, Duration::from_secs(300));
        assert_eq!(config.slide_interval, Duration::from_secs(60));
        assert_eq!(config.allowed_lateness, Duration::from_secs(10));
        config.validate().unwrap();
    }

    #[test]
    fn test_zero_slide_rejected() {
        let config = PipelineConfig {
            slide_interval: Duration::ZERO,
            ..PipelineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("slide_interval"));
    }

    #[test]
    fn test_window_shorter_than_slide_rejected() {
        let config = PipelineConfig {
            window_length: Duration::from_secs(10),
            slide_interval: Duration::from_secs(60),
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_memory_bound_rejected() {
        let config = PipelineConfig {
            open_window_memory_bound: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_override() {
        // Env vars are process-global; use a name no other test touches.
        std::env::set_var(ENV_ALLOWED_LATENESS, "2s");
        let config = PipelineConfig::from_env().unwrap();
        assert_eq!(config.allowed_lateness, Duration::from_secs(2));
        std::env::remove_var(ENV_ALLOWED_LATENESS);
    }
}
