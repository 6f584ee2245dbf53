// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Failure handling for remote operations.
//!
//! - [`classify`]: fault to [`ErrorKind`] mapping and retry-after hints
//! - [`circuit_breaker`]: per-service closed/open/half-open state machine
//! - [`retry`]: bounded retries with backoff and jitter
//! - [`handler`]: the two combined per service, as the gateway uses them

pub mod circuit_breaker;
pub mod classify;
pub mod handler;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitError, CircuitSnapshot, CircuitState, Permit};
pub use classify::{classify, extract_retry_after, parse_retry_after, ErrorKind, Fault};
pub use handler::{ErrorHandler, ErrorStats};
pub use retry::{retry, BackoffStrategy, RetryConfig, RetryContext, RetryError, RetryableError};
