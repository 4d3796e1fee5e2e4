//! Caller-side retry policy
//!
//! The pipeline never retries on its own (apart from the single retry after a
//! token refresh). Data layers that want automatic retries use
//! [`RetryPolicy`]: client errors are final, server errors and network
//! failures are retried with exponential backoff.

use std::future::Future;
use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::error::{ApiError, ApiResult};

/// Retry policy for idempotent reads
///
/// # Example
///
/// ```no_run
/// use lms_api_client::{ApiClient, RetryPolicy};
///
/// # async fn example(client: ApiClient) -> lms_api_client::ApiResult<()> {
/// let policy = RetryPolicy::default();
/// let quizzes: serde_json::Value = policy.run(|| client.get("/quizzes/")).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, TypedBuilder)]
pub struct RetryPolicy {
    /// Retries after the first failure
    #[builder(default = 3)]
    pub max_retries: u32,

    /// Delay before the first retry; doubles each time
    #[builder(default = Duration::from_millis(1000))]
    pub base_delay: Duration,

    /// Upper bound on any single delay
    #[builder(default = Duration::from_secs(30))]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Policy that never retries
    #[must_use]
    pub fn never() -> Self {
        Self::builder().max_retries(0).build()
    }

    /// Whether to retry after `failures` consecutive failures ending in `err`
    #[must_use]
    pub fn should_retry(&self, err: &ApiError, failures: u32) -> bool {
        if failures > self.max_retries {
            return false;
        }
        match err {
            ApiError::Network(_) => true,
            ApiError::Api { status, .. } => *status >= 500,
            ApiError::Decode(_) | ApiError::Storage(_) | ApiError::InvalidConfig(_) => false,
        }
    }

    /// Delay before the retry that follows the `failures`-th failure
    #[must_use]
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1 << exponent)
            .min(self.max_delay)
    }

    /// Drive `op` until it succeeds or the policy gives up.
    ///
    /// # Errors
    ///
    /// Returns the last error once it is not retryable or retries run out.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> ApiResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        let mut failures = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    failures += 1;
                    if !self.should_retry(&err, failures) {
                        return Err(err);
                    }
                    let delay = self.delay_for(failures);
                    tracing::debug!(failures, ?delay, error = %err, "Retrying request");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
