//! Retry with jittered backoff, and polling for readiness
//!
//! Both helpers run entirely on the calling task: sleeping between attempts
//! suspends only that task, and nothing keeps running once they return.

use crate::error::{KeelError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// How many times to try, and how long to wait in between
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub attempts: u32,
    /// Base delay between attempts in milliseconds
    pub delay_ms: u64,
    /// Maximum deviation from the base delay in milliseconds
    pub jitter_ms: u64,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay_ms: u64, jitter_ms: u64) -> Self {
        Self {
            attempts,
            delay_ms,
            jitter_ms,
        }
    }

    /// Delay before the next attempt: `delay ± jitter`, never negative
    pub fn next_delay(&self) -> Duration {
        if self.jitter_ms == 0 {
            return Duration::from_millis(self.delay_ms);
        }
        let offset = rand::thread_rng().gen_range(0..=self.jitter_ms.saturating_mul(2));
        let ms = self.delay_ms.saturating_sub(self.jitter_ms).saturating_add(offset);
        Duration::from_millis(ms)
    }

    fn max_attempts(&self) -> u32 {
        self.attempts.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, 2_000, 500)
    }
}

/// Call `op` until it succeeds or the policy runs out of attempts.
///
/// Errors that can't be fixed by trying again (see
/// [`KeelError::is_retryable`]) are returned immediately. When attempts run
/// out the last error is returned.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_attempts();
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt >= attempts => {
                tracing::debug!("{}: giving up after {} attempts", what, attempt);
                return Err(e);
            }
            Err(e) => {
                let delay = policy.next_delay();
                tracing::warn!(
                    "{}: attempt {}/{} failed: {} (retrying in {:?})",
                    what,
                    attempt,
                    attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Block the calling task until `predicate` holds.
///
/// An error from the predicate counts as "not yet". Returns
/// [`KeelError::Timeout`] once the attempts are exhausted.
pub async fn poll_until<F, Fut>(policy: &RetryPolicy, what: &str, mut predicate: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let attempts = policy.max_attempts();
    let mut last_error = None;

    for attempt in 1..=attempts {
        match predicate().await {
            Ok(true) => return Ok(()),
            Ok(false) => {
                tracing::debug!("{}: not ready ({}/{})", what, attempt, attempts);
            }
            Err(e) => {
                tracing::debug!("{}: check failed ({}/{}): {}", what, attempt, attempts, e);
                last_error = Some(e);
            }
        }

        if attempt < attempts {
            tokio::time::sleep(policy.next_delay()).await;
        }
    }

    Err(KeelError::Timeout(match last_error {
        Some(e) => format!("{} after {} attempts, last error: {}", what, attempts, e),
        None => format!("{} after {} attempts", what, attempts),
    }))
}
