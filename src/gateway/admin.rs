// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Administrative operations.

use super::Gateway;
use crate::cache::Invalidation;
use tracing::info;

impl Gateway {
    /// Force a service's breaker closed. Returns false if the service has
    /// never been called.
    pub fn reset_breaker(&self, service: &str) -> bool {
        self.handler.reset_breaker(service)
    }

    pub fn reset_all_breakers(&self) {
        self.handler.reset_all_breakers();
    }

    /// Dispatch every queued batch now. Returns the number of requests flushed.
    pub async fn flush_batches(&self) -> usize {
        self.batcher.flush_all().await
    }

    pub fn invalidate_service(&self, service: &str) -> usize {
        self.invalidate(Invalidation::Service(service.to_string()))
    }

    pub fn invalidate_operation(&self, service: &str, operation: &str) -> usize {
        self.invalidate(Invalidation::Operation {
            service: service.to_string(),
            operation: operation.to_string(),
        })
    }

    /// Drop every cached key containing `pattern`.
    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        self.invalidate(Invalidation::Pattern(pattern.to_string()))
    }

    fn invalidate(&self, selector: Invalidation) -> usize {
        let removed = self.cache.invalidate(&selector);
        info!(?selector, removed, "Cache invalidated");
        removed
    }

    pub fn clear_cache(&self) -> usize {
        let removed = self.cache.clear();
        info!(removed, "Cache cleared");
        removed
    }

    /// Clear request statistics, history, per-service error counts and
    /// breaker call counters. Breaker state and cached values are untouched.
    pub fn reset_stats(&self) {
        self.monitor.reset_stats();
        self.handler.reset_error_stats();
    }
}

#[cfg(test)]
mod tests {
    use crate::gateway::{CallOptions, Gateway, OperationRequest};
    use crate::resilience::Fault;
    use crate::GatewayConfig;
    use serde_json::{json, Value};

    async fn cache_value(gateway: &Gateway, service: &str, operation: &str, payload: Value) {
        gateway
            .call(
                OperationRequest::new(service, operation, payload),
                CallOptions::cached(),
                || async { Ok::<_, Fault>(json!("result")) },
            )
            .await
            .unwrap();
    }

    fn gateway() -> Gateway {
        let mut config = GatewayConfig::default();
        config.cache.compression_enabled = false;
        Gateway::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_invalidation_scopes() {
        let gateway = gateway();
        cache_value(&gateway, "vision", "describe", json!(1)).await;
        cache_value(&gateway, "vision", "describe", json!(2)).await;
        cache_value(&gateway, "vision", "tag", json!(1)).await;
        cache_value(&gateway, "speech", "transcribe", json!(1)).await;
        assert_eq!(gateway.cache().stats().entry_count, 4);

        assert_eq!(gateway.invalidate_operation("vision", "describe"), 2);
        assert_eq!(gateway.invalidate_service("vision"), 1);
        assert_eq!(gateway.invalidate_pattern("transcribe"), 1);
        assert_eq!(gateway.cache().stats().entry_count, 0);
    }

    #[tokio::test]
    async fn test_clear_cache_and_reset_stats() {
        let gateway = gateway();
        cache_value(&gateway, "vision", "describe", json!(1)).await;
        let _ = gateway
            .call(
                OperationRequest::new("vision", "describe", json!(9)),
                CallOptions::direct(),
                || async { Err(Fault::credentials("expired")) },
            )
            .await;

        assert_eq!(gateway.clear_cache(), 1);
        assert!(!gateway.error_handler().error_stats().is_empty());

        let breaker = &gateway.health().breakers["vision"];
        assert_eq!(breaker.failures, 1);
        assert!((breaker.failure_rate - 0.5).abs() < f64::EPSILON);

        gateway.reset_stats();
        assert!(gateway.monitor().all_stats().is_empty());
        assert!(gateway.error_handler().error_stats().is_empty());
        let breaker = &gateway.health().breakers["vision"];
        assert_eq!(breaker.calls_total, 0);
        assert_eq!(breaker.failure_rate, 0.0);
    }

    #[tokio::test]
    async fn test_flush_with_nothing_queued() {
        let gateway = gateway();
        assert_eq!(gateway.flush_batches().await, 0);
        assert!(!gateway.reset_breaker("unknown"));
        gateway.reset_all_breakers();
    }
}
