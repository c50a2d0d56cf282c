//! Retry for oracle calls.
//!
//! Only errors that [`OracleError::is_retryable`] accepts are retried, and the
//! caller must hand in a closure that re-sends the same rendered request.

use backon::{ExponentialBuilder, Retryable};
use std::future::Future;
use std::time::Duration;

use crate::providers::OracleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub min_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: usize, min_delay: Duration) -> Self {
        Self {
            max_retries,
            min_delay,
        }
    }

    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self::new(0, Duration::from_secs(1))
    }

    pub async fn run<T, F, Fut>(&self, op: F) -> Result<T, OracleError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OracleError>>,
    {
        let mut op = op;
        if self.max_retries == 0 {
            return op().await;
        }

        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_times(self.max_retries)
            .with_jitter();

        op.retry(backoff)
            .when(OracleError::is_retryable)
            .notify(|err: &OracleError, delay: Duration| {
                tracing::warn!(error = %err, delay_ms = delay.as_millis() as u64, "Retrying oracle call");
            })
            .await
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}
