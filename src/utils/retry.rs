//! Retry utilities for resilient fetches
//!
//! This module provides the bounded retry policy wrapped around every page
//! fetch. Unlike classic exponential backoff, the pause between attempts is
//! drawn uniformly from a configured interval so that consecutive requests do
//! not form a regular pattern.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::utils::error::HarvestError;

/// Longest pause allowed between two requests, in seconds
pub const MAX_DELAY_SECS: f64 = 3600.0;

/// Inclusive interval, in seconds, from which inter-request delays are drawn
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DelayInterval {
    /// Lower bound in seconds
    pub min_secs: f64,

    /// Upper bound in seconds
    pub max_secs: f64,
}

impl Default for DelayInterval {
    fn default() -> Self {
        Self {
            min_secs: 0.5,
            max_secs: 1.5,
        }
    }
}

impl DelayInterval {
    /// Create a new interval
    pub fn new(min_secs: f64, max_secs: f64) -> Self {
        Self { min_secs, max_secs }
    }

    /// Interval that never sleeps (used by tests and dry runs)
    pub fn zero() -> Self {
        Self::new(0.0, 0.0)
    }

    /// Check that the bounds are non-negative, ordered and at most an hour
    pub fn is_valid(&self) -> bool {
        self.min_secs >= 0.0 && self.max_secs >= self.min_secs && self.max_secs <= MAX_DELAY_SECS
    }

    /// Draw one delay uniformly from the interval
    ///
    /// Bounds are clamped to `0..=MAX_DELAY_SECS`, so an unchecked interval
    /// never panics.
    pub fn sample(&self) -> Duration {
        let min = self.min_secs.max(0.0).min(MAX_DELAY_SECS);
        let max = self.max_secs.min(MAX_DELAY_SECS).max(min);

        let secs = if max > min {
            rand::thread_rng().gen_range(min..=max)
        } else {
            min
        };

        Duration::from_secs_f64(secs)
    }
}

/// Sleep for a randomized duration drawn from `interval`
pub async fn jitter_sleep(interval: &DelayInterval) {
    let delay = interval.sample();
    if !delay.is_zero() {
        debug!(delay_ms = delay.as_millis() as u64, "Pausing between requests");
        tokio::time::sleep(delay).await;
    }
}

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts (the first try included)
    pub max_attempts: u32,

    /// Interval from which the pause between attempts is drawn
    pub delay: DelayInterval,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: DelayInterval::default(),
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with a custom attempt limit
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Create a retry configuration with a custom delay interval
    pub fn with_delay(max_attempts: u32, delay: DelayInterval) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Execute a harvest operation, retrying transient failures
///
/// Transient errors are those for which [`HarvestError::is_transient`]
/// returns true: transport failures, malformed or rejected responses, and an
/// exhausted fallback chain.
///
/// # Example
///
/// ```no_run
/// use pinglun::utils::error::HarvestError;
/// use pinglun::utils::retry::{with_retry, RetryConfig};
///
/// async fn fetch_page() -> Result<u32, HarvestError> {
///     Ok(20)
/// }
///
/// # async fn run() -> Result<(), HarvestError> {
/// let config = RetryConfig::default();
/// let items = with_retry(&config, || fetch_page()).await?;
/// # Ok(())
/// # }
/// ```
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, operation: F) -> Result<T, HarvestError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, HarvestError>>,
{
    with_retry_if(config, operation, HarvestError::is_transient).await
}

/// Execute an operation with retry logic, using a custom retry predicate
///
/// Returns `Ok(T)` on success, the first non-retryable error, or the last
/// error once every attempt has been used.
pub async fn with_retry_if<T, E, F, Fut, P>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let attempts = config.attempts();
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) => {
                if !should_retry(&e) {
                    warn!(error = %e, "Non-retryable error encountered");
                    return Err(e);
                }

                if attempt >= attempts {
                    warn!(attempt, max_attempts = attempts, error = %e, "Retries exhausted");
                    return Err(e);
                }

                warn!(
                    attempt,
                    max_attempts = attempts,
                    error = %e,
                    "Operation failed, will retry"
                );
            }
        }

        jitter_sleep(&config.delay).await;
        attempt += 1;
    }
}
