//! Retry policy and executor

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::backoff::{BackoffCalculator, BackoffStrategy};

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,

    /// Initial delay between retries
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Backoff strategy
    pub backoff_strategy: BackoffStrategy,

    /// Whether to add jitter to retry delays
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_strategy: BackoffStrategy::default(),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy for read-modify-write cycles that lose an etag race
    ///
    /// Short jittered exponential delays: the competing writer usually
    /// finishes within a few milliseconds.
    pub fn optimistic(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay: Duration::from_secs(2),
            backoff_strategy: BackoffStrategy::Exponential { base: 2.0 },
            jitter: true,
        }
    }

    /// Create a fixed-delay retry policy
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: delay,
            max_delay: delay,
            backoff_strategy: BackoffStrategy::Fixed,
            jitter: false,
        }
    }

    /// Calculate delay for a specific attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        BackoffCalculator::new(
            self.backoff_strategy.clone(),
            self.initial_delay,
            self.max_delay,
            self.jitter,
        )
        .calculate_delay(attempt)
    }
}

/// Trait for errors that can be retried
pub trait Retryable {
    /// Whether this error is retryable
    fn is_retryable(&self) -> bool;

    /// Whether this is a transient error that should be retried immediately
    fn is_transient(&self) -> bool {
        false
    }

    /// Custom retry delay for this error type
    fn retry_delay(&self) -> Option<Duration> {
        None
    }
}

/// Retry executor
pub struct RetryExecutor {
    policy: RetryPolicy,
    cancel: Option<CancellationToken>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            cancel: None,
        }
    }

    /// Create with default policy
    pub fn with_default_policy() -> Self {
        Self::new(RetryPolicy::default())
    }

    /// Abandon the remaining attempts once `token` is cancelled
    ///
    /// An attempt already in flight is never interrupted; cancellation is
    /// only observed while waiting between attempts.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute a function with retry logic
    pub async fn execute<F, Fut, T, E>(&self, mut f: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        self.execute_with_context(|_attempt| f()).await
    }

    /// Execute a function with retry logic and attempt context
    pub async fn execute_with_context<F, Fut, T, E>(&self, mut f: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let mut attempt = 1;

        loop {
            debug!(
                "Executing attempt {} of {}",
                attempt, self.policy.max_attempts
            );

            let error = match f(attempt).await {
                Ok(result) => {
                    if attempt > 1 {
                        info!("Operation succeeded after {} attempts", attempt);
                    }
                    return Ok(result);
                }
                Err(error) => error,
            };

            if !error.is_retryable() {
                warn!("Operation failed with non-retryable error: {}", error);
                return Err(RetryError::NonRetryableError(error));
            }

            if attempt >= self.policy.max_attempts {
                warn!("Operation failed after {} attempts: {}", attempt, error);
                return Err(RetryError::MaxAttemptsExceeded {
                    attempts: attempt,
                    last_error: error,
                });
            }

            let delay = error
                .retry_delay()
                .unwrap_or_else(|| self.policy.delay_for_attempt(attempt));

            if error.is_transient() && delay < Duration::from_millis(10) {
                debug!("Transient error, retrying immediately");
            } else {
                debug!(
                    "Attempt {} failed: {}. Retrying in {:?}",
                    attempt, error, delay
                );
                if !self.pause(delay).await {
                    warn!("Retry abandoned after {} attempts: cancelled", attempt);
                    return Err(RetryError::Cancelled {
                        attempts: attempt,
                        last_error: error,
                    });
                }
            }

            attempt += 1;
        }
    }

    /// Sleep between attempts, returns false when cancelled first
    async fn pause(&self, delay: Duration) -> bool {
        match &self.cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => false,
                    _ = tokio::time::sleep(delay) => true,
                }
            }
            None => {
                tokio::time::sleep(delay).await;
                true
            }
        }
    }
}

/// Retry error types
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Maximum retry attempts exceeded
    #[error("Maximum retry attempts ({attempts}) exceeded. Last error: {last_error}")]
    MaxAttemptsExceeded { attempts: u32, last_error: E },

    /// Non-retryable error encountered
    #[error("Non-retryable error: {0}")]
    NonRetryableError(E),

    /// Cancelled while waiting for the next attempt
    #[error("Retry cancelled after {attempts} attempts. Last error: {last_error}")]
    Cancelled { attempts: u32, last_error: E },
}

impl<E> RetryError<E> {
    /// Get the underlying error
    pub fn into_inner(self) -> E {
        match self {
            RetryError::MaxAttemptsExceeded { last_error, .. } => last_error,
            RetryError::NonRetryableError(error) => error,
            RetryError::Cancelled { last_error, .. } => last_error,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }
}
