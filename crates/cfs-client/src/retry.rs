use std::future::Future;
use std::time::Duration;

use crate::error::ClientError;

/// Bounded retry with a fixed pause between attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: usize,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            delay: Duration::ZERO,
        }
    }
}

/// Retry an async operation while it fails with a retryable error.
pub async fn retry_async<T, Op, Fut>(policy: &RetryPolicy, mut operation: Op) -> Result<T, ClientError>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut attempt = 0usize;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !error.is_retryable() || attempt >= policy.max_retries {
                    return Err(error);
                }
                tracing::debug!(attempt, %error, "retrying request");
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
        }
    }
}
