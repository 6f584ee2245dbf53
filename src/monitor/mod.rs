// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Request monitoring.
//!
//! Every request that passes through the gateway ends in exactly one
//! [`Outcome`], which the [`Monitor`] folds into per-(service, operation)
//! counters, a bounded request history, and a sliding alert window.
//!
//! ```text
//! record(svc, op, latency, outcome)
//!        │
//!        ├──► PerformanceStats   (cumulative, per svc/op)
//!        ├──► AlertWindow ──► thresholds ──► AlertSink(s)
//!        └──► History ring       (pruned by age in the sweeper)
//! ```

pub mod alerts;
pub mod history;
pub mod stats;

pub use alerts::{Alert, AlertMetric, AlertSink, AlertThreshold};
pub use history::{History, RequestRecord};
pub use stats::{AlertWindow, PerformanceStats, StatsSnapshot};

use crate::resilience::ErrorKind;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// Configuration for the request monitor
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Requests kept in the history ring
    pub history_capacity: usize,
    /// History older than this is pruned by the sweeper
    #[serde(rename = "retention_ms", with = "crate::config::serde_millis")]
    pub retention: Duration,
    #[serde(rename = "sweep_interval_ms", with = "crate::config::serde_millis")]
    pub sweep_interval: Duration,
    /// Completed requests per (service, operation) considered by alerts
    pub alert_window: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            history_capacity: 1000,
            retention: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(60 * 60),
            alert_window: 100,
        }
    }
}

/// How a request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    /// Failed without retrying, or with a non-retryable error
    Failed(ErrorKind),
    RetriesExhausted(ErrorKind),
    /// Rejected by an open circuit breaker
    BreakerOpen,
    /// Served from cache
    CacheHit,
}

impl Outcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed(_) => "failed",
            Self::RetriesExhausted(_) => "retries_exhausted",
            Self::BreakerOpen => "breaker_open",
            Self::CacheHit => "cache_hit",
        }
    }

    /// Error kind, for the failing outcomes.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Failed(kind) | Self::RetriesExhausted(kind) => Some(*kind),
            _ => None,
        }
    }

    /// Whether the request reached the remote service and finished.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Success | Self::Failed(_) | Self::RetriesExhausted(_))
    }
}

/// Overall health, worst first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Critical,
    Degraded,
    Warning,
    Healthy,
}

impl HealthStatus {
    /// Ladder over aggregate error rate (percent), rate-limit hits, and
    /// breaker trips.
    #[must_use]
    pub fn assess(error_rate: f64, rate_limit_hits: u64, breaker_trips: u64) -> Self {
        if error_rate > 20.0 || breaker_trips > 0 {
            Self::Critical
        } else if error_rate > 10.0 || rate_limit_hits > 5 {
            Self::Degraded
        } else if error_rate > 5.0 || rate_limit_hits > 0 {
            Self::Warning
        } else {
            Self::Healthy
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Degraded => "degraded",
            Self::Warning => "warning",
            Self::Healthy => "healthy",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A service flagged by [`Monitor::health_summary`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceIssue {
    pub service: String,
    pub error_rate: f64,
    pub rate_limit_hits: u64,
    pub breaker_trips: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSummary {
    pub status: HealthStatus,
    pub total_requests: u64,
    pub total_failures: u64,
    pub error_rate: f64,
    pub rate_limit_hits: u64,
    pub breaker_trips: u64,
    pub services_monitored: usize,
    pub services_with_issues: Vec<ServiceIssue>,
}

#[derive(Debug)]
struct OperationEntry {
    stats: PerformanceStats,
    window: AlertWindow,
}

/// Collects request outcomes and raises alerts.
pub struct Monitor {
    config: MonitorConfig,
    operations: Mutex<HashMap<(String, String), OperationEntry>>,
    history: Mutex<History>,
    thresholds: DashMap<String, Vec<AlertThreshold>>,
    sinks: RwLock<Vec<Arc<dyn AlertSink>>>,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("config", &self.config)
            .field("sinks", &self.sinks.read().len())
            .finish_non_exhaustive()
    }
}

impl Monitor {
    pub fn new(config: MonitorConfig) -> Self {
        let history = History::new(config.history_capacity);
        Self {
            config,
            operations: Mutex::new(HashMap::new()),
            history: Mutex::new(history),
            thresholds: DashMap::new(),
            sinks: RwLock::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Replace the alert thresholds for `service`.
    pub fn set_thresholds(&self, service: impl Into<String>, thresholds: Vec<AlertThreshold>) {
        let service = service.into();
        if thresholds.is_empty() {
            self.thresholds.remove(&service);
        } else {
            self.thresholds.insert(service, thresholds);
        }
    }

    /// Add or replace a single threshold for `service`.
    pub fn set_alert_threshold(&self, service: impl Into<String>, metric: AlertMetric, limit: f64) {
        let mut entry = self.thresholds.entry(service.into()).or_default();
        entry.retain(|t| t.metric != metric);
        entry.push(AlertThreshold { metric, limit });
    }

    pub fn add_sink(&self, sink: Arc<dyn AlertSink>) {
        self.sinks.write().push(sink);
    }

    /// Record one finished request.
    ///
    /// Alerts are evaluated after the counters are updated and delivered
    /// with no monitor lock held, so a sink may query the monitor.
    pub fn record(&self, service: &str, operation: &str, latency: Duration, outcome: Outcome) {
        let fired = {
            let mut operations = self.operations.lock();
            let entry = operations
                .entry((service.to_string(), operation.to_string()))
                .or_insert_with(|| OperationEntry {
                    stats: PerformanceStats::default(),
                    window: AlertWindow::new(self.config.alert_window),
                });
            entry.stats.apply(outcome, latency);

            if outcome.is_completed() {
                entry.window.push(outcome == Outcome::Success, latency);
                self.evaluate(service, operation, &entry.window)
            } else {
                Vec::new()
            }
        };

        self.history.lock().push(service, operation, outcome, latency);

        crate::metrics::record_call(service, operation, outcome.as_str());
        if outcome.is_completed() {
            crate::metrics::record_latency(service, operation, latency);
        }
        if let Some(kind) = outcome.kind() {
            crate::metrics::record_error(service, kind.as_str());
        }

        if !fired.is_empty() {
            let sinks = self.sinks.read().clone();
            for alert in &fired {
                alerts::deliver(&sinks, alert);
            }
        }
    }

    fn evaluate(&self, service: &str, operation: &str, window: &AlertWindow) -> Vec<Alert> {
        let Some(thresholds) = self.thresholds.get(service) else {
            return Vec::new();
        };
        thresholds
            .iter()
            .filter_map(|threshold| {
                let observed = match threshold.metric {
                    AlertMetric::ErrorRate => window.error_rate(),
                    AlertMetric::SuccessRate => window.success_rate(),
                    AlertMetric::AverageLatency => window.average_latency_secs(),
                };
                threshold.metric.breached(observed, threshold.limit).then(|| Alert {
                    service: service.to_string(),
                    operation: operation.to_string(),
                    metric: threshold.metric,
                    observed,
                    threshold: threshold.limit,
                })
            })
            .collect()
    }

    /// Count a rate-limit response from `service`.
    pub fn record_rate_limit_hit(&self, service: &str, operation: &str) {
        let mut operations = self.operations.lock();
        let entry = operations
            .entry((service.to_string(), operation.to_string()))
            .or_insert_with(|| OperationEntry {
                stats: PerformanceStats::default(),
                window: AlertWindow::new(self.config.alert_window),
            });
        entry.stats.rate_limit_hits += 1;
        crate::metrics::record_rate_limit_hit(service);
    }

    /// Snapshot of every operation recorded for `service`.
    #[must_use]
    pub fn service_stats(&self, service: &str) -> BTreeMap<String, StatsSnapshot> {
        self.operations
            .lock()
            .iter()
            .filter(|((svc, _), _)| svc == service)
            .map(|((_, op), entry)| (op.clone(), entry.stats.snapshot()))
            .collect()
    }

    /// Snapshot of everything, keyed by service then operation.
    #[must_use]
    pub fn all_stats(&self) -> BTreeMap<String, BTreeMap<String, StatsSnapshot>> {
        let mut all: BTreeMap<String, BTreeMap<String, StatsSnapshot>> = BTreeMap::new();
        for ((service, operation), entry) in self.operations.lock().iter() {
            all.entry(service.clone())
                .or_default()
                .insert(operation.clone(), entry.stats.snapshot());
        }
        all
    }

    /// The most recent `limit` requests, oldest first.
    #[must_use]
    pub fn recent_requests(&self, service: Option<&str>, limit: usize) -> Vec<RequestRecord> {
        self.history.lock().recent(service, limit)
    }

    #[must_use]
    pub fn health_summary(&self) -> HealthSummary {
        #[derive(Default)]
        struct Totals {
            total: u64,
            failed: u64,
            rate_limit_hits: u64,
            breaker_trips: u64,
        }

        let mut per_service: BTreeMap<String, Totals> = BTreeMap::new();
        for ((service, _), entry) in self.operations.lock().iter() {
            let totals = per_service.entry(service.clone()).or_default();
            totals.total += entry.stats.total;
            totals.failed += entry.stats.failed;
            totals.rate_limit_hits += entry.stats.rate_limit_hits;
            totals.breaker_trips += entry.stats.breaker_trips;
        }

        let mut overall = Totals::default();
        let mut services_with_issues = Vec::new();
        for (service, totals) in &per_service {
            overall.total += totals.total;
            overall.failed += totals.failed;
            overall.rate_limit_hits += totals.rate_limit_hits;
            overall.breaker_trips += totals.breaker_trips;

            let error_rate = rate(totals.failed, totals.total);
            if error_rate > 10.0 || totals.rate_limit_hits > 0 || totals.breaker_trips > 0 {
                services_with_issues.push(ServiceIssue {
                    service: service.clone(),
                    error_rate: stats::round2(error_rate),
                    rate_limit_hits: totals.rate_limit_hits,
                    breaker_trips: totals.breaker_trips,
                });
            }
        }

        let error_rate = rate(overall.failed, overall.total);
        HealthSummary {
            status: HealthStatus::assess(error_rate, overall.rate_limit_hits, overall.breaker_trips),
            total_requests: overall.total,
            total_failures: overall.failed,
            error_rate: stats::round2(error_rate),
            rate_limit_hits: overall.rate_limit_hits,
            breaker_trips: overall.breaker_trips,
            services_monitored: per_service.len(),
            services_with_issues,
        }
    }

    /// Clear counters, alert windows, and history. Thresholds and sinks stay.
    pub fn reset_stats(&self) {
        self.operations.lock().clear();
        self.history.lock().clear();
        info!("Monitor statistics reset");
    }

    /// Drop history older than the retention window.
    pub fn prune_history(&self) -> usize {
        self.history.lock().prune(self.config.retention)
    }

    /// Spawn the periodic history sweep. Stops when `shutdown` flips to true
    /// or its sender is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        let interval = self.config.sweep_interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let records = monitor.prune_history();
                        if records > 0 {
                            debug!(records, "Monitor sweep pruned history");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Monitor sweeper stopped");
        })
    }
}

fn rate(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 / whole as f64 * 100.0
}
