// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Health and tuning reports.

use crate::batching::{BatchConfig, BatchStats};
use crate::cache::{CacheStats, ServiceCacheStats};
use crate::monitor::{HealthStatus, HealthSummary};
use crate::resilience::{CircuitSnapshot, CircuitState, ErrorStats};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Point-in-time view of every gateway component.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Worst of the monitor's assessment and current breaker states
    pub status: HealthStatus,
    pub requests: HealthSummary,
    pub breakers: BTreeMap<String, CircuitSnapshot>,
    pub errors: BTreeMap<String, ErrorStats>,
    pub cache: CacheStats,
    pub cache_by_service: BTreeMap<String, ServiceCacheStats>,
    pub batches: BatchStats,
}

impl HealthReport {
    pub(crate) fn assemble(
        requests: HealthSummary,
        breakers: BTreeMap<String, CircuitSnapshot>,
        errors: BTreeMap<String, ErrorStats>,
        cache: CacheStats,
        cache_by_service: BTreeMap<String, ServiceCacheStats>,
        batches: BatchStats,
    ) -> Self {
        let breaker_status = breakers
            .values()
            .map(|b| match b.state {
                CircuitState::Open => HealthStatus::Critical,
                CircuitState::HalfOpen => HealthStatus::Degraded,
                CircuitState::Closed => HealthStatus::Healthy,
            })
            .min()
            .unwrap_or(HealthStatus::Healthy);

        Self {
            status: requests.status.min(breaker_status),
            requests,
            breakers,
            errors,
            cache,
            cache_by_service,
            batches,
        }
    }

    /// Services whose breaker is not closed.
    #[must_use]
    pub fn tripped_services(&self) -> Vec<&str> {
        self.breakers
            .iter()
            .filter(|(_, b)| b.state != CircuitState::Closed)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Tuning hint produced by [`PerformanceSummary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    /// More than 20 requests are queued
    IncreaseBatchSize,
    /// `max_wait_time` is above 2s
    ReduceBatchWait,
    /// Hit rate below 30%
    ImproveHitRate,
    /// Byte budget above 90% used
    GrowCache,
    /// Byte budget below 10% used
    ShrinkCache,
}

impl Recommendation {
    #[must_use]
    pub fn message(&self) -> &'static str {
        match self {
            Self::IncreaseBatchSize => "Consider increasing max_batch_size to reduce queue build-up",
            Self::ReduceBatchWait => "Consider reducing max_wait_time for better responsiveness",
            Self::ImproveHitRate => "Low cache hit rate; consider a larger cache or longer TTL",
            Self::GrowCache => "Cache utilisation high; consider increasing max_size",
            Self::ShrinkCache => "Cache underutilised; consider reducing max_size",
        }
    }
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

const PENDING_LIMIT: usize = 20;
const WAIT_LIMIT: Duration = Duration::from_secs(2);
const LOW_HIT_RATE: f64 = 0.3;
const HIGH_UTILIZATION: f64 = 0.9;
const LOW_UTILIZATION: f64 = 0.1;

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSummary {
    pub pending_requests: usize,
    pub active_batches: usize,
    #[serde(rename = "max_wait_time_ms", serialize_with = "crate::config::serde_millis::serialize")]
    pub max_wait_time: Duration,
    pub max_batch_size: usize,
    pub cache_hit_rate: f64,
    pub cache_utilization: f64,
    pub cache_entries: usize,
    pub cache_bytes: usize,
    /// Empty when nothing needs attention
    pub recommendations: Vec<Recommendation>,
}

impl PerformanceSummary {
    pub(crate) fn assemble(batch_config: &BatchConfig, batches: &BatchStats, cache: &CacheStats) -> Self {
        let mut recommendations = Vec::new();
        if batches.total_pending > PENDING_LIMIT {
            recommendations.push(Recommendation::IncreaseBatchSize);
        }
        if batch_config.max_wait_time > WAIT_LIMIT {
            recommendations.push(Recommendation::ReduceBatchWait);
        }
        if cache.hit_rate < LOW_HIT_RATE {
            recommendations.push(Recommendation::ImproveHitRate);
        }
        if cache.utilization > HIGH_UTILIZATION {
            recommendations.push(Recommendation::GrowCache);
        }
        if cache.utilization < LOW_UTILIZATION {
            recommendations.push(Recommendation::ShrinkCache);
        }

        Self {
            pending_requests: batches.total_pending,
            active_batches: batches.total_in_flight,
            max_wait_time: batch_config.max_wait_time,
            max_batch_size: batch_config.max_batch_size,
            cache_hit_rate: cache.hit_rate,
            cache_utilization: cache.utilization,
            cache_entries: cache.entry_count,
            cache_bytes: cache.size_bytes,
            recommendations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch_stats(pending: usize) -> BatchStats {
        BatchStats {
            queues: BTreeMap::new(),
            total_pending: pending,
            total_in_flight: 0,
            batches_dispatched: 0,
            requests_dispatched: 0,
            size_flushes: 0,
            time_flushes: 0,
            manual_flushes: 0,
        }
    }

    fn cache_stats(hit_rate: f64, utilization: f64) -> CacheStats {
        CacheStats {
            hits: 0,
            misses: 0,
            evictions: 0,
            expirations: 0,
            entry_count: 0,
            size_bytes: 0,
            max_size: 100,
            hit_rate,
            utilization,
        }
    }

    fn summary(requests_status: HealthStatus) -> HealthSummary {
        HealthSummary {
            status: requests_status,
            total_requests: 0,
            total_failures: 0,
            error_rate: 0.0,
            rate_limit_hits: 0,
            breaker_trips: 0,
            services_monitored: 0,
            services_with_issues: Vec::new(),
        }
    }

    #[test]
    fn test_healthy_setup_has_no_recommendations() {
        let summary = PerformanceSummary::assemble(&BatchConfig::default(), &batch_stats(3), &cache_stats(0.8, 0.5));
        assert!(summary.recommendations.is_empty());
    }

    #[test]
    fn test_recommendations_follow_thresholds() {
        let config = BatchConfig {
            max_wait_time: Duration::from_secs(3),
            ..BatchConfig::default()
        };
        let summary = PerformanceSummary::assemble(&config, &batch_stats(21), &cache_stats(0.1, 0.95));
        assert_eq!(
            summary.recommendations,
            vec![
                Recommendation::IncreaseBatchSize,
                Recommendation::ReduceBatchWait,
                Recommendation::ImproveHitRate,
                Recommendation::GrowCache,
            ]
        );

        let idle = PerformanceSummary::assemble(&BatchConfig::default(), &batch_stats(0), &cache_stats(0.5, 0.05));
        assert_eq!(idle.recommendations, vec![Recommendation::ShrinkCache]);
    }

    #[test]
    fn test_open_breaker_makes_report_critical() {
        let breaker = crate::resilience::CircuitBreaker::with_defaults("vision");
        let mut breakers = BTreeMap::new();
        breakers.insert("vision".to_string(), breaker.snapshot());

        let report = HealthReport::assemble(
            summary(HealthStatus::Warning),
            breakers.clone(),
            BTreeMap::new(),
            cache_stats(0.5, 0.5),
            BTreeMap::new(),
            batch_stats(0),
        );
        assert_eq!(report.status, HealthStatus::Warning);
        assert!(report.tripped_services().is_empty());

        if let Some(snapshot) = breakers.get_mut("vision") {
            snapshot.state = CircuitState::Open;
        }
        let report = HealthReport::assemble(
            summary(HealthStatus::Healthy),
            breakers,
            BTreeMap::new(),
            cache_stats(0.5, 0.5),
            BTreeMap::new(),
            batch_stats(0),
        );
        assert_eq!(report.status, HealthStatus::Critical);
        assert_eq!(report.tripped_services(), vec!["vision"]);
    }
}
