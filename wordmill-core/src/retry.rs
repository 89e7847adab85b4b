//! Bounded retry with exponential backoff.
//!
//! One utility shared by every external collaborator call site (log source
//! reads, sink appends) instead of a hand-rolled sleep loop per caller.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};

/// Backoff schedule: `base_delay` doubling per attempt, capped at `max_delay`,
/// for at most `max_attempts` attempts total.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// The delay to sleep after the given 1-based failed attempt.
    fn delay_after(&self, attempt: usize) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16) as u32;
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Run `op` until it succeeds or the policy's attempts are exhausted.
///
/// `what` names the operation in logs and in the final error context.
/// Exhaustion returns the last error; the caller decides whether that is
/// fatal for the pipeline.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= policy.max_attempts => {
                return Err(err)
                    .with_context(|| format!("{what}: gave up after {attempt} attempts"));
            }
            Err(err) => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    "{what} failed (attempt {attempt}/{}), retrying in {:?}: {err:#}",
                    policy.max_attempts,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::anyhow;

    use super::*;

    fn fast_policy(max_attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_delay_doubles_up_to_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(350));
        assert_eq!(policy.delay_after(9), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicUsize::new(0);
        let out = retry_with_backoff(fast_policy(5), "flaky op", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(anyhow!("transient"))
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_surfaces_last_error() {
        let calls = AtomicUsize::new(0);
        let err = retry_with_backoff(fast_policy(3), "doomed op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(anyhow!("still broken"))
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(err.to_string().contains("gave up after 3 attempts"));
    }

    #[tokio::test]
    async fn test_immediate_success_runs_once() {
        let calls = AtomicUsize::new(0);
        retry_with_backoff(fast_policy(5), "healthy op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
