// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-service protection: one circuit breaker per service, retries around
//! each breaker-guarded attempt, and error bookkeeping.
//!
//! ```text
//! execute(svc, op, f)
//!   └─ retry(config.retry_for(svc))
//!        └─ breaker(svc).call(f)     ← every attempt passes the breaker
//! ```
//!
//! A rejection by the breaker carries no error kind, so the retry loop stops
//! at once and the caller sees [`GatewayError::BreakerOpen`].

use super::circuit_breaker::{CircuitBreaker, CircuitSnapshot};
use super::classify::{ErrorKind, Fault};
use super::retry::{self, RetryContext};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::monitor::Monitor;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// Failed attempts seen for one service.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorStats {
    /// Every failed attempt, retried or not
    pub total_errors: u64,
    /// Failed attempts that were followed by another attempt
    pub retried: u64,
    pub by_kind: BTreeMap<ErrorKind, u64>,
    pub last_kind: Option<ErrorKind>,
}

pub struct ErrorHandler {
    config: Arc<GatewayConfig>,
    monitor: Arc<Monitor>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    errors: DashMap<String, ErrorStats>,
}

impl std::fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorHandler")
            .field("breakers", &self.breakers.len())
            .finish_non_exhaustive()
    }
}

impl ErrorHandler {
    pub fn new(config: Arc<GatewayConfig>, monitor: Arc<Monitor>) -> Self {
        Self {
            config,
            monitor,
            breakers: DashMap::new(),
            errors: DashMap::new(),
        }
    }

    /// The breaker for `service`, created on first use.
    pub fn breaker(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(service) {
            return Arc::clone(&existing);
        }
        let entry = self.breakers.entry(service.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::new(service, self.config.circuit_for(service).clone()))
        });
        Arc::clone(&entry)
    }

    /// Run `op` under the service's breaker and retry policy.
    ///
    /// `op` is invoked once per attempt. Rate-limited attempts are reported
    /// to the monitor as they happen; the final outcome is left to the
    /// caller to record.
    pub async fn execute<F, Fut, T>(&self, service: &str, operation: &str, op: F) -> Result<T, GatewayError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, Fault>>,
    {
        let breaker = self.breaker(service);
        let breaker = &*breaker;
        let op = &op;

        retry::retry(
            service,
            operation,
            self.config.retry_for(service),
            move || breaker.call(op),
            |ctx| self.observe(ctx),
        )
        .await
        .map_err(|err| GatewayError::from_retry(service, operation, err))
    }

    fn observe(&self, ctx: &RetryContext) {
        {
            let mut stats = self.errors.entry(ctx.service.clone()).or_default();
            stats.total_errors += 1;
            if ctx.next_delay.is_some() {
                stats.retried += 1;
            }
            *stats.by_kind.entry(ctx.kind).or_default() += 1;
            stats.last_kind = Some(ctx.kind);
        }

        if ctx.kind == ErrorKind::RateLimit {
            self.monitor.record_rate_limit_hit(&ctx.service, &ctx.operation);
        }
    }

    /// Snapshot of every breaker created so far, keyed by service.
    #[must_use]
    pub fn breaker_states(&self) -> BTreeMap<String, CircuitSnapshot> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect()
    }

    /// Returns false if no breaker exists for `service` yet.
    pub fn reset_breaker(&self, service: &str) -> bool {
        match self.breakers.get(service) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all_breakers(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
        info!(count = self.breakers.len(), "All circuit breakers reset");
    }

    #[must_use]
    pub fn error_stats(&self) -> BTreeMap<String, ErrorStats> {
        self.errors
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Clear error counts and every breaker's call counters. Breaker state
    /// is left alone.
    pub fn reset_error_stats(&self) {
        self.errors.clear();
        for entry in self.breakers.iter() {
            entry.value().reset_metrics();
        }
    }
}
