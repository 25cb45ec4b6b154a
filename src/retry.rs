use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Bounded exponential backoff for calls into external processes and services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// `policy.max_attempts` is used up. The last error is returned.
pub fn with_backoff<T, F>(operation_name: &str, policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation() {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(operation = operation_name, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() && attempt < attempts => {
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying"
                );
                std::thread::sleep(delay);
            }
            Err(err) => {
                if attempt > 1 {
                    tracing::error!(operation = operation_name, attempt, error = %err, "giving up");
                }
                return Err(err);
            }
        }
    }
}
