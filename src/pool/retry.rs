//! Bounded exponential backoff for transient failures.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::config::PoolSettings;
use crate::{Error, Result};

/// Jitter added to every backoff delay.
const MAX_JITTER_MS: u64 = 50;

/// Retry limits for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl From<&PoolSettings> for RetryPolicy {
    fn from(settings: &PoolSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.backoff_base_ms),
            max_delay: Duration::from_millis(settings.backoff_max_ms),
        }
    }
}

impl RetryPolicy {
    /// No retries; handy for tests.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before attempt `attempt + 1`, without jitter. `attempt` is 1-based.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }
}

fn jitter() -> Duration {
    if MAX_JITTER_MS == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..MAX_JITTER_MS))
}

/// Run `op` until it succeeds, fails non-transiently, or attempts run out.
///
/// Exhausted transient failures come back as
/// [`Error::TransientConnectivity`] carrying the attempt count.
pub async fn retry_transient<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                let delay = if delay.is_zero() { delay } else { delay + jitter() };
                tracing::warn!(
                    operation = label,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) if err.is_transient() => {
                return Err(Error::TransientConnectivity {
                    attempts: attempt,
                    message: match err {
                        Error::TransientConnectivity { message, .. } => message,
                        other => other.to_string(),
                    },
                });
            }
            Err(err) => return Err(err),
        }
    }
}
