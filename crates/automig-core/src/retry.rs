//! Exponential backoff with jitter for transient conditions
//!
//! [`retry_on`] is a small higher-order helper: the caller supplies the
//! predicate recognizing the retryable condition, so the same helper serves
//! any call site.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

use crate::errors::{ExError, ExErrorKind, Result};

/// Retry budget and pacing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries allowed after the first call
    pub max_attempts: u32,
    /// Base delay; attempt `n` waits `2^n * base * jitter`
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 100,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), for a jitter in `[1, 2)`
    pub fn delay_for(&self, attempt: u32, jitter: f64) -> Duration {
        // 2^attempt, capped so large budgets cannot overflow
        let factor = 2_u64.saturating_pow(attempt.min(32));
        let base = self.base_delay_ms.saturating_mul(factor);
        Duration::from_secs_f64(base as f64 * jitter / 1000.0)
    }
}

/// Call `op` until it succeeds, fails with something `is_retryable` rejects,
/// or the retry budget runs out
///
/// Exhaustion yields [`ExErrorKind::RetriesExhausted`] with the last failure
/// as its source, so no outer layer mistakes it for the transient condition.
pub async fn retry_on<T, F, Fut, P>(
    policy: &RetryPolicy,
    condition: &str,
    is_retryable: P,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&ExError) -> bool,
{
    let mut attempts: u32 = 0;

    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !is_retryable(&err) {
            return Err(err);
        }

        if attempts >= policy.max_attempts {
            tracing::error!(
                condition,
                attempt = attempts,
                "transient condition persisted past retry budget"
            );
            return Err(ExError::new(ExErrorKind::RetriesExhausted)
                .with_op("retry_on")
                .with_message(format!(
                    "retried {} times, but {} persisted",
                    attempts, condition
                ))
                .with_source(err));
        }

        attempts += 1;
        let jitter: f64 = rand::thread_rng().gen_range(1.0..2.0);
        let delay = policy.delay_for(attempts, jitter);
        tracing::warn!(
            condition,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            "transient condition, retrying"
        );

        tokio::time::sleep(delay).await;
    }
}
