// DME Collector - Telemetry collection
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Retry logic for transport reads

use std::future::Future;
use std::time::{Duration, Instant};
use tracing::debug;

/// Errors that know whether another attempt may succeed
pub trait Retryable {
    /// Whether the operation should be attempted again
    fn is_transient(&self) -> bool;
}

impl Retryable for crate::error::TransportError {
    fn is_transient(&self) -> bool {
        crate::error::TransportError::is_transient(self)
    }
}

/// Retry strategy
#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// No retry
    None,
    /// Fixed delay between retries
    Fixed {
        /// Maximum number of retry attempts
        max_retries: u32,
        /// Delay between retries
        delay: Duration,
    },
    /// Exponential backoff
    ExponentialBackoff {
        /// Maximum number of retry attempts
        max_retries: u32,
        /// Initial delay
        initial_delay: Duration,
        /// Maximum delay
        max_delay: Duration,
        /// Multiplier for each attempt
        multiplier: f64,
    },
}

impl RetryStrategy {
    /// Calculate delay for a given attempt number (0-indexed)
    ///
    /// Returns None if no more retries should be attempted
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::Fixed { max_retries, delay } => (attempt < *max_retries).then_some(*delay),
            Self::ExponentialBackoff {
                max_retries,
                initial_delay,
                max_delay,
                multiplier,
            } => {
                if attempt < *max_retries {
                    let delay_ms =
                        initial_delay.as_millis() as f64 * multiplier.powi(attempt as i32);
                    let delay = Duration::from_millis(delay_ms as u64);
                    Some(delay.min(*max_delay))
                } else {
                    None
                }
            }
        }
    }

    /// Get maximum number of retries
    pub fn max_retries(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::Fixed { max_retries, .. } | Self::ExponentialBackoff { max_retries, .. } => {
                *max_retries
            }
        }
    }

    /// Total attempts including the first
    pub fn max_attempts(&self) -> u32 {
        self.max_retries().saturating_add(1)
    }

    /// Create a fixed retry strategy
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self::Fixed { max_retries, delay }
    }

    /// Create an exponential backoff strategy
    pub fn exponential(max_retries: u32, initial_delay: Duration) -> Self {
        Self::ExponentialBackoff {
            max_retries,
            initial_delay,
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Outcome of a retried operation
#[derive(Debug)]
pub struct RetryResult<T, E> {
    /// Final result
    pub result: Result<T, E>,
    /// Attempts made, the first included
    pub attempts: u32,
    /// Time spent, backoff included
    pub total_duration: Duration,
}

/// Execute an async operation with retry logic
///
/// The operation receives the 1-based attempt number. Only transient errors
/// are retried; the last error is returned once the strategy is exhausted.
///
/// # Example
///
/// ```ignore
/// let strategy = RetryStrategy::exponential(3, Duration::from_millis(500));
/// let outcome = with_retry(&strategy, |_| transport.fetch(&schema)).await;
/// ```
pub async fn with_retry<T, E, F, Fut>(strategy: &RetryStrategy, mut operation: F) -> RetryResult<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let start = Instant::now();
    let mut attempt = 0;

    loop {
        let result = operation(attempt + 1).await;
        let error = match result {
            Ok(value) => {
                return RetryResult {
                    result: Ok(value),
                    attempts: attempt + 1,
                    total_duration: start.elapsed(),
                }
            }
            Err(e) => e,
        };

        let delay = if error.is_transient() {
            strategy.delay_for_attempt(attempt)
        } else {
            None
        };
        debug!(
            attempt = attempt + 1,
            transient = error.is_transient(),
            error = %error,
            "attempt failed"
        );

        match delay {
            Some(delay) => {
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            None => {
                return RetryResult {
                    result: Err(error),
                    attempts: attempt + 1,
                    total_duration: start.elapsed(),
                }
            }
        }
    }
}
