//! Bounded exponential backoff for leaf stores talking to remote backends.

use std::future::Future;
use std::time::Duration;

use crate::error::KvError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles on every further attempt.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

/// Runs `f` until it succeeds, fails with a non-transient error, or the
/// policy's attempts are exhausted. Returns the last error in the latter case.
pub async fn retry_with_backoff<T, F, Fut>(policy: RetryPolicy, what: &str, f: F) -> Result<T, KvError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, KvError>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    "{what} failed, retrying in {delay:?}: {e}"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
