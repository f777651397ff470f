//! Linear-backoff retry for store operations.
//!
//! Only errors that [`StoreError::is_transient`] reports as transient are
//! retried; everything else surfaces on the first attempt.

use std::future::Future;
use std::time::Duration;

use crate::store::StoreError;

/// Tunable parameters for the linear-backoff strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    /// Delay unit; the wait after attempt `n` is `step * n`.
    pub step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            step: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub const fn new(attempts: u32, step: Duration) -> Self {
        Self { attempts, step }
    }

    /// Policy for terminal job writes, which must not be lost.
    pub const fn terminal() -> Self {
        Self::new(5, Duration::from_millis(500))
    }

    /// No waiting between attempts.
    pub const fn immediate(attempts: u32) -> Self {
        Self::new(attempts, Duration::ZERO)
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.step * attempt
    }
}

/// Run `op` until it succeeds, fails permanently, or the policy is
/// exhausted.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut op: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1u32;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < attempts => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Store operation failed, retrying",
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
