// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-operation performance counters.

use super::Outcome;
use crate::resilience::ErrorKind;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

/// Cumulative counters for one (service, operation).
///
/// `total` counts completed requests only: successes, failures, and
/// exhausted retries. Breaker rejections and cache hits have their own
/// counters and do not move the rates.
#[derive(Debug, Clone, Default)]
pub struct PerformanceStats {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retries_exhausted: u64,
    pub rejected: u64,
    pub cache_hits: u64,
    pub rate_limit_hits: u64,
    pub breaker_trips: u64,
    /// Sum of successful request latencies
    pub total_latency: Duration,
    pub min_latency: Option<Duration>,
    pub max_latency: Duration,
    pub last_request_at: Option<Instant>,
    pub failures_by_kind: BTreeMap<ErrorKind, u64>,
}

impl PerformanceStats {
    pub fn apply(&mut self, outcome: Outcome, latency: Duration) {
        self.last_request_at = Some(Instant::now());
        match outcome {
            Outcome::Success => {
                self.total += 1;
                self.succeeded += 1;
                self.total_latency += latency;
                self.min_latency = Some(self.min_latency.map_or(latency, |m| m.min(latency)));
                self.max_latency = self.max_latency.max(latency);
            }
            Outcome::Failed(kind) => {
                self.total += 1;
                self.failed += 1;
                *self.failures_by_kind.entry(kind).or_default() += 1;
            }
            Outcome::RetriesExhausted(kind) => {
                self.total += 1;
                self.failed += 1;
                self.retries_exhausted += 1;
                *self.failures_by_kind.entry(kind).or_default() += 1;
            }
            Outcome::BreakerOpen => {
                self.rejected += 1;
                self.breaker_trips += 1;
            }
            Outcome::CacheHit => self.cache_hits += 1,
        }
    }

    /// Percent of completed requests that succeeded; 0 with no requests.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        percent(self.succeeded, self.total)
    }

    #[must_use]
    pub fn error_rate(&self) -> f64 {
        percent(self.failed, self.total)
    }

    /// Mean latency over successful requests.
    #[must_use]
    pub fn average_latency(&self) -> Duration {
        if self.succeeded == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total_latency.as_nanos() / u128::from(self.succeeded);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_requests: self.total,
            successful_requests: self.succeeded,
            failed_requests: self.failed,
            retries_exhausted: self.retries_exhausted,
            rejected_requests: self.rejected,
            cache_hits: self.cache_hits,
            rate_limit_hits: self.rate_limit_hits,
            breaker_trips: self.breaker_trips,
            success_rate: round2(self.success_rate()),
            error_rate: round2(self.error_rate()),
            average_latency_ms: millis(self.average_latency()),
            min_latency_ms: self.min_latency.map_or(0.0, millis),
            max_latency_ms: millis(self.max_latency),
            last_request_secs_ago: self
                .last_request_at
                .map(|at| Instant::now().saturating_duration_since(at).as_secs_f64()),
            failures_by_kind: self.failures_by_kind.clone(),
        }
    }
}

/// Serializable view of [`PerformanceStats`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub retries_exhausted: u64,
    pub rejected_requests: u64,
    pub cache_hits: u64,
    pub rate_limit_hits: u64,
    pub breaker_trips: u64,
    pub success_rate: f64,
    pub error_rate: f64,
    pub average_latency_ms: f64,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    pub last_request_secs_ago: Option<f64>,
    pub failures_by_kind: BTreeMap<ErrorKind, u64>,
}

/// Sliding window of the last N completed requests, used for alerting.
#[derive(Debug, Clone)]
pub struct AlertWindow {
    capacity: usize,
    samples: VecDeque<(bool, Duration)>,
}

impl AlertWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, succeeded: bool, latency: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back((succeeded, latency));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn successes(&self) -> impl Iterator<Item = Duration> + '_ {
        self.samples.iter().filter(|(ok, _)| *ok).map(|(_, latency)| *latency)
    }

    #[must_use]
    pub fn success_rate(&self) -> f64 {
        percent(self.successes().count() as u64, self.samples.len() as u64)
    }

    #[must_use]
    pub fn error_rate(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        100.0 - self.success_rate()
    }

    /// Mean latency of the window's successes, in seconds.
    #[must_use]
    pub fn average_latency_secs(&self) -> f64 {
        let (count, sum) = self
            .successes()
            .fold((0u32, Duration::ZERO), |(n, total), latency| (n + 1, total + latency));
        if count == 0 {
            return 0.0;
        }
        (sum / count).as_secs_f64()
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 / whole as f64 * 100.0
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
