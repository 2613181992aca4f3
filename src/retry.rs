//! Bounded retry with exponential backoff, jitter and cancellation

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{RetryClass, UploadError};
use crate::pacer::{Category, Outcome, RateLimiter};

/// Retry ceilings and delays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// No retry is scheduled past this much elapsed time
    pub max_elapsed: Duration,
    /// Delay before the first retry of a transient failure
    pub base_delay: Duration,
    /// Ceiling for exponential backoff
    pub max_backoff: Duration,
    /// Delay for throttling responses that carry no Retry-After
    pub throttle_delay: Duration,
    /// Add up to 50% random jitter to backoff delays
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            max_elapsed: Duration::from_secs(300),
            base_delay: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            throttle_delay: Duration::from_secs(5),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_max_elapsed(mut self, elapsed: Duration) -> Self {
        self.max_elapsed = elapsed;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_backoff(mut self, delay: Duration) -> Self {
        self.max_backoff = delay;
        self
    }

    pub fn with_throttle_delay(mut self, delay: Duration) -> Self {
        self.throttle_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Backoff before retry number `retry` (0 = first retry)
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.min(31)).unwrap_or(u32::MAX);
        let delay = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff);

        if self.jitter {
            let spread = (delay.as_millis() as u64) / 2;
            delay + Duration::from_millis(fastrand::u64(0..=spread))
        } else {
            delay
        }
    }
}

/// Runs fallible operations under a retry policy
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Invoke `operation` until it succeeds, fails non-retryably, runs out of
    /// attempts or elapsed time, or `cancel` fires.
    ///
    /// The attempt number (0-based) is passed to `operation`. Call sites that
    /// consume a byte source must hand each attempt a rewound copy.
    pub async fn run<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, UploadError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, UploadError>>,
    {
        let start = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(UploadError::Cancelled),
                result = operation(attempt) => result,
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let wait = match err.retry_class() {
                RetryClass::Throttled => err.retry_after().unwrap_or(self.policy.throttle_delay),
                RetryClass::Transient => self.policy.backoff(attempt),
                RetryClass::Cancelled | RetryClass::Authorization | RetryClass::Fatal => {
                    return Err(err)
                }
            };

            attempt += 1;
            if attempt >= self.policy.max_attempts {
                warn!("Giving up after {} attempts: {}", attempt, err);
                return Err(err);
            }
            if start.elapsed() + wait > self.policy.max_elapsed {
                warn!(
                    "Giving up after {:?} (retry would exceed {:?}): {}",
                    start.elapsed(),
                    self.policy.max_elapsed,
                    err
                );
                return Err(err);
            }

            warn!(
                "Attempt {}/{} failed: {}, retrying in {}ms...",
                attempt,
                self.policy.max_attempts,
                err,
                wait.as_millis()
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                _ = sleep(wait) => {}
            }
        }
    }

    /// Like [`run`](Self::run), but every attempt first waits on the rate
    /// limiter and reports its outcome back to it.
    pub async fn run_paced<T, F, Fut>(
        &self,
        limiter: &RateLimiter,
        category: Category,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, UploadError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, UploadError>>,
    {
        self.run(cancel, |attempt| {
            let call = operation(attempt);
            async move {
                limiter.acquire(category, cancel).await?;
                let result = call.await;
                if let Some(outcome) = Outcome::from_result(&result) {
                    limiter.report_outcome(category, outcome);
                }
                result
            }
        })
        .await
    }
}
