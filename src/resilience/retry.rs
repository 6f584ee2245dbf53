// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with backoff and jitter.
//!
//! Provides bounded retry behavior for transient failures. Each failure is
//! classified into an [`ErrorKind`]; only kinds listed in
//! [`RetryConfig::retryable_kinds`] are retried.
//!
//! # Example
//!
//! ```
//! use resilient_gateway::resilience::retry::{BackoffStrategy, RetryConfig};
//! use std::time::Duration;
//!
//! let config = RetryConfig {
//!     base_delay: Duration::from_secs(1),
//!     max_delay: Duration::from_secs(10),
//!     backoff_factor: 2.0,
//!     jitter_enabled: false,
//!     strategy: BackoffStrategy::Exponential,
//!     ..RetryConfig::default()
//! };
//!
//! let delays: Vec<u64> = (1..=4).map(|n| config.delay_for(n, None).as_secs()).collect();
//! assert_eq!(delays, vec![1, 2, 4, 8]);
//!
//! // A server-suggested delay wins, capped at max_delay
//! assert_eq!(config.delay_for(1, Some(Duration::from_secs(30))), Duration::from_secs(10));
//! ```

use super::circuit_breaker::CircuitError;
use super::classify::{classify, extract_retry_after, ErrorKind, Fault};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

/// Relative jitter applied to computed delays.
const JITTER_RATIO: f64 = 0.1;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// `base * factor^(attempt - 1)`
    Exponential,
    /// `base * attempt`
    Linear,
    /// `base`
    Fixed,
}

/// Configuration for operation retry behavior.
///
/// Use the preset constructors for common patterns:
/// - [`RetryConfig::default()`] - 3 attempts, exponential from 1s, capped at 60s
/// - [`RetryConfig::query()`] - Quick retry for latency-sensitive calls
/// - [`RetryConfig::patient()`] - More attempts for expensive background work
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first call
    pub max_attempts: u32,
    #[serde(rename = "base_delay_ms", with = "crate::config::serde_millis")]
    pub base_delay: Duration,
    #[serde(rename = "max_delay_ms", with = "crate::config::serde_millis")]
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub jitter_enabled: bool,
    pub strategy: BackoffStrategy,
    pub retryable_kinds: HashSet<ErrorKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            jitter_enabled: true,
            strategy: BackoffStrategy::Exponential,
            retryable_kinds: default_retryable_kinds(),
        }
    }
}

/// Network, Timeout, ServiceUnavailable and RateLimit.
#[must_use]
pub fn default_retryable_kinds() -> HashSet<ErrorKind> {
    [
        ErrorKind::Network,
        ErrorKind::Timeout,
        ErrorKind::ServiceUnavailable,
        ErrorKind::RateLimit,
    ]
    .into_iter()
    .collect()
}

impl RetryConfig {
    /// Quick retry for interactive calls (don't block the caller for long).
    #[must_use]
    pub fn query() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            ..Self::default()
        }
    }

    /// Patient retry for background work that can afford to wait.
    #[must_use]
    pub fn patient() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(120),
            ..Self::default()
        }
    }

    /// Fast retry for tests (minimal delays, deterministic)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            jitter_enabled: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        self.retryable_kinds.contains(&kind)
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    ///
    /// A server-suggested delay is used as-is, capped at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(server) = retry_after {
            return server.min(self.max_delay);
        }

        let base = self.base_delay.as_secs_f64();
        let max = self.max_delay.as_secs_f64();
        let raw = match self.strategy {
            BackoffStrategy::Exponential => {
                let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
                base * self.backoff_factor.powi(exponent)
            }
            BackoffStrategy::Linear => base * f64::from(attempt),
            BackoffStrategy::Fixed => base,
        };

        let mut delay = if raw.is_finite() { raw.min(max) } else { max };
        if self.jitter_enabled {
            let spread = delay * JITTER_RATIO;
            delay += rand::thread_rng().gen_range(-spread..=spread);
        }

        Duration::from_secs_f64(delay.clamp(0.0, max))
    }
}

/// Errors the retry loop knows how to reason about.
pub trait RetryableError {
    /// Semantic kind, or `None` when the error must end the loop at once.
    fn kind(&self) -> Option<ErrorKind>;

    /// Server-suggested delay before the next attempt.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl RetryableError for Fault {
    fn kind(&self) -> Option<ErrorKind> {
        Some(classify(self))
    }

    fn retry_after(&self) -> Option<Duration> {
        extract_retry_after(self)
    }
}

impl<E: RetryableError> RetryableError for CircuitError<E> {
    fn kind(&self) -> Option<ErrorKind> {
        match self {
            CircuitError::Rejected => None,
            CircuitError::Inner(e) => e.kind(),
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            CircuitError::Rejected => None,
            CircuitError::Inner(e) => e.retry_after(),
        }
    }
}

/// One failed attempt, handed to the retry observer.
#[derive(Debug, Clone)]
pub struct RetryContext {
    pub service: String,
    pub operation: String,
    /// 1-based attempt number that failed
    pub attempt: u32,
    pub kind: ErrorKind,
    /// Delay before the next attempt; `None` when the loop stops here
    pub next_delay: Option<Duration>,
    pub occurred_at: Instant,
}

/// Why the retry loop gave up.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable kind.
    #[error("gave up after {attempts} attempts ({kind}): {last}")]
    Exhausted {
        attempts: u32,
        kind: ErrorKind,
        last: E,
    },

    /// The failure kind is not in the retryable set.
    #[error("{kind} failure is not retryable: {error}")]
    NotRetryable {
        attempt: u32,
        kind: ErrorKind,
        error: E,
    },

    /// The error carried no kind (e.g. the circuit rejected the call).
    #[error("{0}")]
    Aborted(E),
}

impl<E> RetryError<E> {
    /// The error from the final attempt.
    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { last, .. } => last,
            Self::NotRetryable { error, .. } => error,
            Self::Aborted(e) => e,
        }
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable kind, or
/// `max_attempts` is reached. `observe` sees every failed attempt.
pub async fn retry<F, Fut, T, E, O>(
    service: &str,
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
    mut observe: O,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + Display,
    O: FnMut(&RetryContext),
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(val) => {
                if attempt > 1 {
                    info!(
                        service,
                        operation = operation_name,
                        attempt,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(val);
            }
            Err(err) => {
                let Some(kind) = err.kind() else {
                    return Err(RetryError::Aborted(err));
                };

                let retryable = config.is_retryable(kind);
                let next_delay = (retryable && attempt < max_attempts)
                    .then(|| config.delay_for(attempt, err.retry_after()));

                observe(&RetryContext {
                    service: service.to_string(),
                    operation: operation_name.to_string(),
                    attempt,
                    kind,
                    next_delay,
                    occurred_at: Instant::now(),
                });

                if !retryable {
                    return Err(RetryError::NotRetryable {
                        attempt,
                        kind,
                        error: err,
                    });
                }

                let Some(delay) = next_delay else {
                    warn!(
                        service,
                        operation = operation_name,
                        attempts = attempt,
                        %kind,
                        error = %err,
                        "Retries exhausted"
                    );
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        kind,
                        last: err,
                    });
                };

                warn!(
                    service,
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    %kind,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Attempt failed, retrying"
                );
                crate::metrics::record_retry(service, kind.as_str());
                sleep(delay).await;
            }
        }
    }
}
