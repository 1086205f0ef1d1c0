//! Async helpers shared by the session layer
//!
//! Provides bounded retry with exponential backoff and timeout wrappers

use crate::error::{ErrorContext, StockroomError, StockroomResult};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, error, warn};

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Number of additional attempts after the first one
    pub max_retries: usize,
    /// Delay before the first retry in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_delay_ms: u64,
    /// Backoff multiplier (exponential backoff)
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 8000,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Total number of attempts, including the first
    pub fn max_attempts(&self) -> usize {
        self.max_retries + 1
    }

    /// Delay before retry number `retry` (0-based), without jitter
    pub fn delay_for_retry(&self, retry: usize) -> Duration {
        let factor = self.backoff_multiplier.powi(retry.min(i32::MAX as usize) as i32);
        let delay_ms = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(delay_ms as u64)
    }

    /// Sum of the delays slept after `failures` consecutive failures
    pub fn cumulative_delay(&self, failures: usize) -> Duration {
        (0..failures.min(self.max_retries))
            .map(|retry| self.delay_for_retry(retry))
            .sum()
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter {
            return delay;
        }
        let jitter_factor = 0.1;
        let jitter = (fastrand::f64() - 0.5) * 2.0 * jitter_factor;
        Duration::from_millis(((delay.as_millis() as f64) * (1.0 + jitter)) as u64)
    }
}

/// Result of a retried operation with its bookkeeping
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    /// Attempts made, including the first
    pub attempts: usize,
    /// Time spent sleeping between attempts
    pub total_delay: Duration,
}

/// Retry an async operation with exponential backoff
///
/// The closure receives the 0-based attempt number. Errors for which
/// `should_retry` returns false end the loop immediately.
pub async fn retry_async<'a, F, T, E, P>(
    mut operation: F,
    config: &RetryConfig,
    operation_name: &str,
    should_retry: P,
) -> RetryOutcome<T, E>
where
    F: FnMut(usize) -> BoxFuture<'a, Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;
    let mut total_delay = Duration::ZERO;

    loop {
        debug!(
            operation = operation_name,
            attempt = attempt + 1,
            max_attempts = config.max_attempts(),
            "Attempting operation"
        );

        match operation(attempt).await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        "Operation succeeded after retry"
                    );
                }
                return RetryOutcome {
                    result: Ok(result),
                    attempts: attempt + 1,
                    total_delay,
                };
            }
            Err(err) => {
                if !should_retry(&err) {
                    debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        error = %err,
                        "Operation failed with non-retryable error"
                    );
                    return RetryOutcome {
                        result: Err(err),
                        attempts: attempt + 1,
                        total_delay,
                    };
                }

                if attempt >= config.max_retries {
                    error!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        error = %err,
                        "Operation failed after all retry attempts"
                    );
                    return RetryOutcome {
                        result: Err(err),
                        attempts: attempt + 1,
                        total_delay,
                    };
                }

                let delay = config.jittered(config.delay_for_retry(attempt));
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying"
                );

                sleep(delay).await;
                total_delay += delay;
                attempt += 1;
            }
        }
    }
}

/// Bound `future` by `timeout_ms`, dropping it when the bound elapses
pub async fn with_timeout<F, T>(
    future: F,
    timeout_ms: u64,
    operation_name: &str,
) -> StockroomResult<T>
where
    F: std::future::Future<Output = T>,
{
    timeout(Duration::from_millis(timeout_ms), future)
        .await
        .map_err(|_| StockroomError::Timeout {
            operation: operation_name.to_string(),
            duration_ms: timeout_ms,
            context: ErrorContext::new("async_utils")
                .with_operation(operation_name)
                .with_metadata("timeout_ms", &timeout_ms.to_string())
                .with_suggestion("Raise the timeout in the [profile] or [session] config section"),
        })
}
