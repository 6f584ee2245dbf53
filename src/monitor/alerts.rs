// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Alert thresholds and sinks.

use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, warn};

/// Metric an alert threshold watches, evaluated over the alert window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertMetric {
    /// Failed share of completed requests, in percent; fires above the limit
    ErrorRate,
    /// Mean latency of successful requests, in seconds; fires above the limit
    AverageLatency,
    /// Successful share of completed requests, in percent; fires below the limit
    SuccessRate,
}

impl AlertMetric {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ErrorRate => "error_rate",
            Self::AverageLatency => "average_latency",
            Self::SuccessRate => "success_rate",
        }
    }

    /// Whether `observed` crosses `limit` for this metric.
    #[must_use]
    pub fn breached(&self, observed: f64, limit: f64) -> bool {
        match self {
            Self::ErrorRate | Self::AverageLatency => observed > limit,
            Self::SuccessRate => observed < limit,
        }
    }
}

impl std::fmt::Display for AlertMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertThreshold {
    pub metric: AlertMetric,
    pub limit: f64,
}

/// A threshold crossing.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub service: String,
    pub operation: String,
    pub metric: AlertMetric,
    pub observed: f64,
    pub threshold: f64,
}

/// Receives alerts. Called synchronously after the request is recorded;
/// keep it cheap, or hand off to a channel.
pub trait AlertSink: Send + Sync {
    fn notify(&self, service: &str, metric: AlertMetric, observed: f64, threshold: f64);
}

impl<F> AlertSink for F
where
    F: Fn(&str, AlertMetric, f64, f64) + Send + Sync,
{
    fn notify(&self, service: &str, metric: AlertMetric, observed: f64, threshold: f64) {
        self(service, metric, observed, threshold)
    }
}

/// Hand `alert` to every sink. A panicking sink is logged and skipped.
pub(crate) fn deliver(sinks: &[Arc<dyn AlertSink>], alert: &Alert) {
    warn!(
        service = %alert.service,
        operation = %alert.operation,
        metric = %alert.metric,
        observed = alert.observed,
        threshold = alert.threshold,
        "Alert threshold crossed"
    );
    crate::metrics::record_alert(&alert.service, alert.metric.as_str());

    for sink in sinks {
        let delivered = catch_unwind(AssertUnwindSafe(|| {
            sink.notify(&alert.service, alert.metric, alert.observed, alert.threshold)
        }));
        if delivered.is_err() {
            error!(service = %alert.service, metric = %alert.metric, "Alert sink panicked");
        }
    }
}
