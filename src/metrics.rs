// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the gateway.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host process is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `gateway_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//! - `_bytes` suffix for size gauges
//!
//! # Labels
//! - `service`: remote service name
//! - `operation`: operation name within the service
//! - `status`: success, failed, retries_exhausted, breaker_open, cache_hit
//! - `reason`: batch flush trigger (size, time, manual)

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a completed gateway call
pub fn record_call(service: &str, operation: &str, status: &str) {
    counter!(
        "gateway_calls_total",
        "service" => service.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record call latency
pub fn record_latency(service: &str, operation: &str, duration: Duration) {
    histogram!(
        "gateway_call_seconds",
        "service" => service.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

// ═══════════════════════════════════════════════════════════════════════════
// ERROR TRACKING - Categorized error counters for alerting
// ═══════════════════════════════════════════════════════════════════════════

/// Record a failed attempt with its error kind
pub fn record_error(service: &str, kind: &str) {
    counter!(
        "gateway_errors_total",
        "service" => service.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record a retry about to be scheduled
pub fn record_retry(service: &str, kind: &str) {
    counter!(
        "gateway_retries_total",
        "service" => service.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record a rate-limited attempt
pub fn record_rate_limit_hit(service: &str) {
    counter!(
        "gateway_rate_limit_hits_total",
        "service" => service.to_string()
    )
    .increment(1);
}

/// Record an alert threshold crossing
pub fn record_alert(service: &str, metric: &str) {
    counter!(
        "gateway_alerts_total",
        "service" => service.to_string(),
        "metric" => metric.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// CIRCUIT BREAKER - Resilience metrics
// ═══════════════════════════════════════════════════════════════════════════

/// Record circuit breaker state change (0 = closed, 1 = half-open, 2 = open)
pub fn set_circuit_state(circuit: &str, state: u8) {
    gauge!(
        "gateway_circuit_breaker_state",
        "circuit" => circuit.to_string()
    )
    .set(state as f64);
}

/// Record circuit breaker call outcome
pub fn record_circuit_call(circuit: &str, outcome: &str) {
    counter!(
        "gateway_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// BATCHING - Queue depth and flush metrics
// ═══════════════════════════════════════════════════════════════════════════

/// Record dispatched batch size
pub fn record_batch_size(service: &str, count: usize) {
    histogram!(
        "gateway_batch_size",
        "service" => service.to_string()
    )
    .record(count as f64);
}

/// Record what triggered a batch dispatch
pub fn record_batch_flush(reason: &str) {
    counter!(
        "gateway_batch_flushes_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record batch dispatch duration
pub fn record_dispatch_duration(duration: Duration) {
    histogram!("gateway_batch_dispatch_seconds").record(duration.as_secs_f64());
}

/// Set batch queue depth (requests waiting for dispatch)
pub fn set_batch_queue_items(count: usize) {
    gauge!("gateway_batch_queue_items").set(count as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// CACHE - Occupancy and effectiveness
// ═══════════════════════════════════════════════════════════════════════════

/// Record a cache lookup (hit, miss, expired)
pub fn record_cache_lookup(outcome: &str) {
    counter!(
        "gateway_cache_lookups_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Set current cache size in bytes
pub fn set_cache_bytes(bytes: usize) {
    gauge!("gateway_cache_bytes").set(bytes as f64);
}

/// Set current cache entry count
pub fn set_cache_items(count: usize) {
    gauge!("gateway_cache_items").set(count as f64);
}

/// Record eviction event
pub fn record_eviction(count: usize, bytes: usize) {
    counter!("gateway_cache_evictions_total").increment(count as u64);
    counter!("gateway_cache_evicted_bytes_total").increment(bytes as u64);
}

/// Record an entry refused for exceeding the per-entry size limit
pub fn record_cache_rejected(bytes: usize) {
    counter!("gateway_cache_rejected_total").increment(1);
    histogram!("gateway_cache_rejected_bytes").record(bytes as f64);
}
