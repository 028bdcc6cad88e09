//! Retry policy for result retrieval.
//!
//! Only fetches follow this policy. A submit is never repeated, and status
//! polls already repeat until their deadline.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::ExecutionError;
use crate::execution::ExecutionId;
use crate::service::ServiceError;

/// Bounded, doubling backoff for transient fetch failures.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRetry {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Wait after the first failure. Doubles per failure up to `max_delay`.
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for FetchRetry {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(3),
        }
    }
}

impl FetchRetry {
    /// Wait after `failures` consecutive failed attempts (1-based).
    ///
    /// Jitter keeps the wait between half the nominal delay and the full
    /// delay, so it never exceeds `max_delay`.
    pub fn delay_after(&self, failures: u32) -> Duration {
        let doublings = failures.saturating_sub(1).min(16);
        let nominal = self
            .base_delay
            .saturating_mul(1 << doublings)
            .min(self.max_delay);
        let ceiling = u64::try_from(nominal.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(fastrand::u64(ceiling / 2..=ceiling))
    }

    /// Wait before the next attempt, or `None` when `error` must surface.
    fn next_delay(&self, error: &ServiceError, failures: u32) -> Option<Duration> {
        (error.retryable() && failures <= self.max_retries).then(|| self.delay_after(failures))
    }

    /// Run `fetch` until it succeeds, fails permanently, or the retry budget
    /// is spent.
    pub async fn run<T, F, Fut>(
        &self,
        execution_id: &ExecutionId,
        mut fetch: F,
    ) -> Result<T, ExecutionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let mut failures = 0;

        loop {
            let error = match fetch().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            failures += 1;

            let Some(delay) = self.next_delay(&error, failures) else {
                return Err(ExecutionError::Fetch {
                    execution_id: execution_id.clone(),
                    attempts: failures,
                    source: error,
                });
            };
            warn!(
                execution_id = %execution_id,
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "result fetch failed; retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
