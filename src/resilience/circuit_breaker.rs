// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Circuit breaker guarding a remote service.
//!
//! Provides protection against hammering a backend that is already failing.
//! Every call asks the breaker for a [`Permit`]; the permit is settled with
//! the call's outcome, which drives the state machine:
//!
//! ```text
//!            failures >= failure_threshold
//!   CLOSED ─────────────────────────────────▶ OPEN
//!     ▲                                        │
//!     │ successes >= success_threshold         │ now >= next_attempt_at
//!     │                                        ▼ (checked lazily on admit)
//!     └────────────────────────────────── HALF_OPEN
//!                 any probe failure ──▶ OPEN
//! ```
//!
//! States:
//! - Closed: Normal operation, requests pass through
//! - Open: Service unhealthy, requests fail-fast without attempting
//! - HalfOpen: Testing if service recovered, at most `half_open_max_calls`
//!   probes in flight

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker state for metrics/monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed = 0,
    HalfOpen = 1,
    Open = 2,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::HalfOpen => write!(f, "half_open"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// Error type for circuit-protected operations
#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    /// The circuit breaker rejected the call (circuit is open)
    #[error("circuit breaker open, request rejected")]
    Rejected,

    /// The underlying operation failed
    #[error("operation failed: {0}")]
    Inner(#[source] E),
}

/// Configuration for a circuit breaker
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    /// Number of consecutive failures to trip the circuit
    pub failure_threshold: u32,
    /// How long to wait before attempting recovery (half-open)
    #[serde(rename = "recovery_timeout_ms", with = "crate::config::serde_millis")]
    pub recovery_timeout: Duration,
    /// Number of consecutive successes in half-open to close circuit
    pub success_threshold: u32,
    /// Maximum probe calls in flight while half-open
    pub half_open_max_calls: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 3,
            half_open_max_calls: 5,
        }
    }
}

impl CircuitConfig {
    /// Aggressive config for expensive backends (trips faster, recovers cautiously)
    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(120),
            success_threshold: 2,
            half_open_max_calls: 1,
        }
    }

    /// Lenient config for cheap, noisy backends (tolerates more failures)
    #[must_use]
    pub fn lenient() -> Self {
        Self {
            failure_threshold: 10,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 1,
            half_open_max_calls: 5,
        }
    }

    /// Fast recovery for testing
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            failure_threshold: 2,
            recovery_timeout: Duration::from_millis(50),
            success_threshold: 1,
            half_open_max_calls: 1,
        }
    }
}

#[derive(Debug)]
struct CircuitStatus {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<Instant>,
    next_attempt_at: Option<Instant>,
    half_open_in_flight: u32,
    /// Bumped on every transition; outcomes from older permits are ignored
    epoch: u64,
}

impl CircuitStatus {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_at: None,
            next_attempt_at: None,
            half_open_in_flight: 0,
            epoch: 0,
        }
    }
}

/// Point-in-time view of a breaker, suitable for health reports.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub half_open_calls: u32,
    /// Milliseconds until an open circuit admits a probe
    pub retry_in_ms: Option<u64>,
    pub calls_total: u64,
    pub successes: u64,
    pub failures: u64,
    pub rejections: u64,
    /// Failed share of admitted calls (0.0 - 1.0)
    pub failure_rate: f64,
}

/// Admission ticket for one call. Settle it with [`Permit::success`] or
/// [`Permit::failure`]; an unsettled probe permit frees its half-open slot
/// when dropped.
#[must_use = "a permit must be settled with the call outcome"]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    epoch: u64,
    probe: bool,
    settled: bool,
}

impl Permit<'_> {
    /// Whether this call is a half-open probe
    #[must_use]
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.epoch);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.epoch);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.release_probe(self.epoch);
        }
    }
}

/// A named circuit breaker with metrics tracking
pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    status: Mutex<CircuitStatus>,

    // Metrics
    calls_total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and config
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        Self {
            name: name.into(),
            config,
            status: Mutex::new(CircuitStatus::new()),
            calls_total: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
        }
    }

    /// Create with default config
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitConfig::default())
    }

    /// Get the circuit breaker name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    /// Get current circuit state.
    ///
    /// An open circuit whose recovery timeout has elapsed still reports
    /// `Open` until the next call attempt moves it to half-open.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.status.lock().state
    }

    /// Ask for permission to call the protected service.
    ///
    /// Returns `None` when the circuit is open, or half-open with every probe
    /// slot taken. The open → half-open check and the probe admission happen
    /// under one lock acquisition.
    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        let mut status = self.status.lock();
        let now = Instant::now();

        if status.state == CircuitState::Open {
            match status.next_attempt_at {
                Some(at) if now >= at => self.transition(&mut status, CircuitState::HalfOpen, now),
                _ => {
                    drop(status);
                    self.reject();
                    return None;
                }
            }
        }

        let mut probe = false;
        if status.state == CircuitState::HalfOpen {
            if status.half_open_in_flight >= self.config.half_open_max_calls {
                drop(status);
                self.reject();
                return None;
            }
            status.half_open_in_flight += 1;
            probe = true;
        }

        self.calls_total.fetch_add(1, Ordering::Relaxed);
        Some(Permit {
            breaker: self,
            epoch: status.epoch,
            probe,
            settled: false,
        })
    }

    /// Execute an async operation through the circuit breaker
    ///
    /// Takes a closure that returns a Future, allowing lazy evaluation. The
    /// closure is never invoked when the call is rejected.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.try_acquire().ok_or(CircuitError::Rejected)?;

        match f().await {
            Ok(result) => {
                permit.success();
                Ok(result)
            }
            Err(e) => {
                permit.failure();
                Err(CircuitError::Inner(e))
            }
        }
    }

    fn reject(&self) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
        debug!(circuit = %self.name, "Circuit breaker rejected call (open)");
        crate::metrics::record_circuit_call(&self.name, "rejected");
    }

    fn on_success(&self, epoch: u64) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_circuit_call(&self.name, "success");

        let mut status = self.status.lock();
        if status.epoch != epoch {
            return;
        }
        match status.state {
            CircuitState::HalfOpen => {
                status.half_open_in_flight = status.half_open_in_flight.saturating_sub(1);
                status.success_count += 1;
                if status.success_count >= self.config.success_threshold {
                    self.transition(&mut status, CircuitState::Closed, Instant::now());
                }
            }
            CircuitState::Closed => status.failure_count = 0,
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, epoch: u64) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_circuit_call(&self.name, "failure");

        let mut status = self.status.lock();
        if status.epoch != epoch {
            return;
        }
        let now = Instant::now();
        status.failure_count += 1;
        status.last_failure_at = Some(now);

        match status.state {
            CircuitState::HalfOpen => {
                warn!(circuit = %self.name, "Probe failed, circuit re-opened");
                self.transition(&mut status, CircuitState::Open, now);
            }
            CircuitState::Closed if status.failure_count >= self.config.failure_threshold => {
                warn!(
                    circuit = %self.name,
                    failures = status.failure_count,
                    "Failure threshold reached, circuit opened"
                );
                self.transition(&mut status, CircuitState::Open, now);
            }
            _ => {}
        }
    }

    fn release_probe(&self, epoch: u64) {
        let mut status = self.status.lock();
        if status.epoch == epoch && status.state == CircuitState::HalfOpen {
            status.half_open_in_flight = status.half_open_in_flight.saturating_sub(1);
        }
    }

    fn transition(&self, status: &mut CircuitStatus, to: CircuitState, now: Instant) {
        let from = status.state;
        status.state = to;
        status.epoch += 1;
        status.half_open_in_flight = 0;
        status.success_count = 0;

        match to {
            CircuitState::Closed => {
                status.failure_count = 0;
                status.next_attempt_at = None;
            }
            CircuitState::Open => {
                let base = status.last_failure_at.unwrap_or(now);
                status.next_attempt_at = Some(base + self.config.recovery_timeout);
            }
            CircuitState::HalfOpen => {}
        }

        info!(circuit = %self.name, %from, %to, "Circuit breaker state change");
        crate::metrics::set_circuit_state(&self.name, to as u8);
    }

    /// Force the circuit back to closed with fresh counters.
    pub fn reset(&self) {
        let mut status = self.status.lock();
        let epoch = status.epoch + 1;
        *status = CircuitStatus::new();
        status.epoch = epoch;
        info!(circuit = %self.name, "Circuit breaker reset");
        crate::metrics::set_circuit_state(&self.name, CircuitState::Closed as u8);
    }

    #[must_use]
    pub fn snapshot(&self) -> CircuitSnapshot {
        let status = self.status.lock();
        let now = Instant::now();
        let retry_in_ms = match (status.state, status.next_attempt_at) {
            (CircuitState::Open, Some(at)) => {
                Some(at.saturating_duration_since(now).as_millis() as u64)
            }
            _ => None,
        };

        CircuitSnapshot {
            name: self.name.clone(),
            state: status.state,
            failure_count: status.failure_count,
            success_count: status.success_count,
            half_open_calls: status.half_open_in_flight,
            retry_in_ms,
            calls_total: self.calls_total(),
            successes: self.successes(),
            failures: self.failures(),
            rejections: self.rejections(),
            failure_rate: self.failure_rate(),
        }
    }

    /// Get total number of admitted calls
    #[must_use]
    pub fn calls_total(&self) -> u64 {
        self.calls_total.load(Ordering::Relaxed)
    }

    /// Get number of successful calls
    #[must_use]
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    /// Get number of failed calls (operation errors)
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Get number of rejected calls (circuit open)
    #[must_use]
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }

    /// Get failure rate (0.0 - 1.0)
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        let total = self.calls_total();
        if total == 0 {
            return 0.0;
        }
        self.failures() as f64 / total as f64
    }

    /// Reset all metrics
    pub fn reset_metrics(&self) {
        self.calls_total.store(0, Ordering::Relaxed);
        self.successes.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.rejections.store(0, Ordering::Relaxed);
    }
}
