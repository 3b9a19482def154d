//! Bounded retry for collaborator calls.
//!
//! Remote stores are retried with a fixed attempt count and a fixed interval;
//! only transient failures are retried, definitive rejections surface
//! immediately.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::StoreError;

/// Fixed attempt count + interval, from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            interval,
        }
    }

    /// No retries, single attempt. Used by tests and local stores.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // 6 attempts, 5 minutes apart
        Self::new(6, Duration::from_secs(300))
    }
}

/// Runs `operation` until it succeeds, fails definitively, or the policy's
/// attempts are exhausted.
pub async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() && attempt < policy.attempts => {
                warn!(
                    operation = operation_name,
                    attempt,
                    attempts = policy.attempts,
                    error = %error,
                    "Retrying transient failure"
                );
                tokio::time::sleep(policy.interval).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}
