// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The gateway: one value that owns every component and routes calls
//! through them.
//!
//! # Call Flow
//!
//! ```text
//! call(request, options, op)
//!   │
//!   ├─ cache on?  CacheManager::lookup ── hit ──► record CacheHit, return
//!   │                   │ miss (ticket)
//!   ▼                   ▼
//!   ├─ batch on?  Batcher::submit("svc:op") ─┐
//!   │   off       ErrorHandler::execute ◄────┘  (breaker per attempt + retry)
//!   │
//!   ├─ Ok + ticket  CacheManager::store
//!   └─ Monitor::record(outcome, latency)
//! ```

mod admin;
pub mod health;
pub mod types;

pub use health::{HealthReport, PerformanceSummary, Recommendation};
pub use types::{CallOptions, OperationRequest};

use crate::batching::{Batcher, Dispatch};
use crate::cache::{CacheManager, Lookup};
use crate::config::{ConfigError, GatewayConfig};
use crate::error::GatewayError;
use crate::monitor::{AlertSink, Monitor, Outcome};
use crate::resilience::{ErrorHandler, ErrorKind, Fault};
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A protected call waiting in a batch queue.
type Job = BoxFuture<'static, Result<Value, GatewayError>>;

/// Runs every job in a batch concurrently; results keep job order.
struct ConcurrentDispatch;

#[async_trait]
impl Dispatch<Job, Value, GatewayError> for ConcurrentDispatch {
    async fn dispatch(
        &self,
        key: &str,
        items: Vec<Job>,
    ) -> Result<Vec<Result<Value, GatewayError>>, GatewayError> {
        debug!(key, count = items.len(), "Dispatching batch");
        Ok(futures::future::join_all(items).await)
    }
}

struct Background {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

/// Construct once at startup and share behind an `Arc`.
pub struct Gateway {
    config: Arc<GatewayConfig>,
    cache: CacheManager,
    handler: Arc<ErrorHandler>,
    monitor: Arc<Monitor>,
    batcher: Arc<Batcher<Job, Value, GatewayError>>,
    background: Mutex<Option<Background>>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("services", &self.config.services.len())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Validate `config` and build every component. Nothing is spawned
    /// until [`start`](Self::start).
    pub fn new(config: GatewayConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let config = Arc::new(config);

        let mut policies = HashMap::new();
        for (service, overrides) in &config.services {
            for (operation, policy) in &overrides.cache_policies {
                policies.insert((service.clone(), operation.clone()), policy.clone());
            }
        }
        let cache = CacheManager::with_policies(config.cache.clone(), policies);

        let monitor = Arc::new(Monitor::new(config.monitor.clone()));
        for (service, overrides) in &config.services {
            if !overrides.alerts.is_empty() {
                monitor.set_thresholds(service.clone(), overrides.alerts.clone());
            }
        }

        let handler = Arc::new(ErrorHandler::new(Arc::clone(&config), Arc::clone(&monitor)));
        let batcher = Batcher::new(config.batch.clone(), Arc::new(ConcurrentDispatch));

        info!(
            services = config.services.len(),
            max_batch_size = config.batch.max_batch_size,
            cache_max_size = config.cache.max_size,
            "Gateway created"
        );

        Ok(Self {
            config,
            cache,
            handler,
            monitor,
            batcher,
            background: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    #[must_use]
    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    #[must_use]
    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    #[must_use]
    pub fn error_handler(&self) -> &Arc<ErrorHandler> {
        &self.handler
    }

    pub fn add_alert_sink(&self, sink: Arc<dyn AlertSink>) {
        self.monitor.add_sink(sink);
    }

    /// Spawn the cache and history sweepers. Calling it twice is a no-op.
    #[tracing::instrument(skip(self))]
    pub fn start(&self) {
        let mut background = self.background.lock();
        if background.is_some() {
            debug!("Gateway already started");
            return;
        }
        let (shutdown, rx) = watch::channel(false);
        let tasks = vec![
            self.cache.cache().spawn_sweeper(rx.clone()),
            self.monitor.spawn_sweeper(rx),
        ];
        *background = Some(Background { shutdown, tasks });
        info!("Gateway started");
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.background.lock().is_some()
    }

    /// Flush queued batches, then stop the sweepers.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        let flushed = self.batcher.flush_all().await;

        let background = self.background.lock().take();
        if let Some(Background { shutdown, tasks }) = background {
            let _ = shutdown.send(true);
            for outcome in futures::future::join_all(tasks).await {
                if let Err(e) = outcome {
                    warn!(error = %e, "Background task ended abnormally");
                }
            }
        }
        info!(flushed, "Gateway stopped");
    }

    /// Run `op` for `request` through cache, batching, breaker, and retry.
    ///
    /// `op` may run several times (once per attempt) and never runs when the
    /// result comes from cache or the breaker is open.
    #[tracing::instrument(
        skip(self, request, op),
        fields(service = %request.service, operation = %request.operation)
    )]
    pub async fn call<F, Fut>(&self, request: OperationRequest, options: CallOptions, op: F) -> Result<Value, GatewayError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, Fault>> + Send + 'static,
    {
        let key = request.batch_key();
        let OperationRequest {
            service,
            operation,
            payload,
            priority,
            context,
        } = request;

        let ticket = if options.cache {
            match self.cache.lookup(&service, &operation, &payload, context.as_ref()) {
                Lookup::Hit(value) => {
                    debug!("Served from cache");
                    self.monitor.record(&service, &operation, Duration::ZERO, Outcome::CacheHit);
                    return Ok(value);
                }
                Lookup::Miss(ticket) => Some(ticket),
            }
        } else {
            None
        };

        let started = Instant::now();
        let result = if options.batch {
            let handler = Arc::clone(&self.handler);
            let (job_service, job_operation) = (service.clone(), operation.clone());
            let job: Job = Box::pin(async move { handler.execute(&job_service, &job_operation, op).await });
            self.batcher.submit(&key, job, priority).await
        } else {
            self.handler.execute(&service, &operation, op).await
        };
        let latency = started.elapsed();

        match &result {
            Ok(value) => {
                if let Some(ticket) = ticket {
                    if let Err(e) = self.cache.store(ticket, value) {
                        warn!(error = %e, "Result not cached");
                    }
                }
                self.monitor.record(&service, &operation, latency, Outcome::Success);
            }
            Err(err) => {
                debug!(error = %err, "Call failed");
                self.monitor.record(&service, &operation, latency, outcome_of(err));
            }
        }
        result
    }

    /// [`call`](Self::call) with default options: cached and batched.
    pub async fn execute<F, Fut>(&self, request: OperationRequest, op: F) -> Result<Value, GatewayError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, Fault>> + Send + 'static,
    {
        self.call(request, CallOptions::default(), op).await
    }

    #[must_use]
    pub fn health(&self) -> HealthReport {
        HealthReport::assemble(
            self.monitor.health_summary(),
            self.handler.breaker_states(),
            self.handler.error_stats(),
            self.cache.stats(),
            self.cache.service_stats(),
            self.batcher.stats(),
        )
    }

    #[must_use]
    pub fn performance_summary(&self) -> PerformanceSummary {
        PerformanceSummary::assemble(self.batcher.config(), &self.batcher.stats(), &self.cache.stats())
    }
}

fn outcome_of(err: &GatewayError) -> Outcome {
    match err {
        GatewayError::BreakerOpen { .. } => Outcome::BreakerOpen,
        GatewayError::RetriesExhausted { kind, .. } => Outcome::RetriesExhausted(*kind),
        GatewayError::Failed { kind, .. } => Outcome::Failed(*kind),
        GatewayError::Batch(_) => Outcome::Failed(ErrorKind::Unknown),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batching::BatchConfig;
    use crate::cache::{CacheConfig, CachePolicy, EvictionStrategy};
    use crate::config::ServiceConfig;
    use crate::monitor::{AlertMetric, AlertThreshold, HealthStatus};
    use crate::resilience::{CircuitConfig, CircuitState, RetryConfig};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config() -> GatewayConfig {
        GatewayConfig {
            batch: BatchConfig {
                max_batch_size: 3,
                max_wait_time: Duration::from_millis(100),
                ..BatchConfig::default()
            },
            cache: CacheConfig {
                max_size: 1024 * 1024,
                default_ttl: Duration::from_secs(60),
                strategy: EvictionStrategy::Hybrid,
                sweep_interval: Duration::from_secs(10),
                compression_enabled: false,
            },
            retry: RetryConfig::test(),
            circuit_breaker: CircuitConfig::test(),
            ..GatewayConfig::default()
        }
    }

    fn request(payload: Value) -> OperationRequest {
        OperationRequest::new("vision", "describe", payload)
    }

    fn counting(calls: &Arc<AtomicU32>) -> impl Fn() -> BoxFuture<'static, Result<Value, Fault>> + Send + Sync + 'static {
        let calls = Arc::clone(calls);
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Box::pin(async move { Ok(json!({ "call": n })) })
        }
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut bad = config();
        bad.batch.max_batch_size = 0;
        assert!(matches!(Gateway::new(bad), Err(ConfigError::Zero { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_skips_operation() {
        let gateway = Gateway::new(config()).unwrap();
        let calls = Arc::new(AtomicU32::new(0));

        let first = gateway
            .call(request(json!({"q": 1})), CallOptions::cached(), counting(&calls))
            .await
            .unwrap();
        let second = gateway
            .call(request(json!({"q": 1})), CallOptions::cached(), counting(&calls))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = &gateway.monitor().service_stats("vision")["describe"];
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.cache_hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_changes_cache_key() {
        let gateway = Gateway::new(config()).unwrap();
        let calls = Arc::new(AtomicU32::new(0));

        let base = request(json!({"q": 1}));
        gateway
            .call(base.clone().with_context(json!({"v": 1})), CallOptions::cached(), counting(&calls))
            .await
            .unwrap();
        gateway
            .call(base.with_context(json!({"v": 2})), CallOptions::cached(), counting(&calls))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_not_cached() {
        let gateway = Gateway::new(config()).unwrap();

        let err = gateway
            .call(request(json!({})), CallOptions::cached(), || async {
                Err(Fault::credentials("expired"))
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), Some(ErrorKind::Authentication));
        assert!(gateway.cache().stats().entry_count == 0);
        let stats = &gateway.monitor().service_stats("vision")["describe"];
        assert_eq!(stats.failed_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batched_calls_share_dispatch() {
        let gateway = Arc::new(Gateway::new(config()).unwrap());
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for i in 0..3 {
            let gateway = Arc::clone(&gateway);
            let op = counting(&calls);
            handles.push(tokio::spawn(async move {
                gateway.call(request(json!({ "i": i })), CallOptions::batched(), op).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        let stats = gateway.health().batches;
        assert_eq!(stats.batches_dispatched, 1);
        assert_eq!(stats.requests_dispatched, 3);
        assert_eq!(stats.size_flushes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_open_is_recorded_as_trip() {
        let gateway = Gateway::new(config()).unwrap();
        for _ in 0..2 {
            let _ = gateway
                .call(request(json!({})), CallOptions::direct(), || async {
                    Err(Fault::credentials("nope"))
                })
                .await;
        }

        let err = gateway
            .call(request(json!({})), CallOptions::direct(), || async { Ok(json!(1)) })
            .await
            .unwrap_err();

        assert!(err.is_breaker_open());
        let stats = &gateway.monitor().service_stats("vision")["describe"];
        assert_eq!(stats.breaker_trips, 1);
        assert_eq!(stats.failed_requests, 2);

        let health = gateway.health();
        assert_eq!(health.status, HealthStatus::Critical);
        assert_eq!(health.breakers["vision"].state, CircuitState::Open);

        gateway.reset_breaker("vision");
        assert_eq!(gateway.health().breakers["vision"].state, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_config_feeds_components() {
        let mut cfg = config();
        let mut policies = HashMap::new();
        policies.insert(
            "describe".to_string(),
            CachePolicy {
                ttl: None,
                sample_rate: 0.0,
            },
        );
        cfg.services.insert(
            "vision".into(),
            ServiceConfig {
                cache_policies: policies,
                alerts: vec![AlertThreshold {
                    metric: AlertMetric::ErrorRate,
                    limit: 0.0,
                }],
                ..ServiceConfig::default()
            },
        );
        let gateway = Gateway::new(cfg).unwrap();
        let alerts = Arc::new(AtomicU32::new(0));
        let alerts_clone = Arc::clone(&alerts);
        gateway.add_alert_sink(Arc::new(move |_: &str, _: AlertMetric, _: f64, _: f64| {
            alerts_clone.fetch_add(1, Ordering::SeqCst);
        }));

        let calls = Arc::new(AtomicU32::new(0));
        for _ in 0..2 {
            gateway
                .call(request(json!({"same": true})), CallOptions::cached(), counting(&calls))
                .await
                .unwrap();
        }
        // sample rate 0 bypasses lookups
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(gateway.cache().service_stats()["vision"].bypassed, 2);

        let _ = gateway
            .call(request(json!({})), CallOptions::direct(), || async {
                Err(Fault::other("boom"))
            })
            .await;
        assert_eq!(alerts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_shutdown() {
        let gateway = Gateway::new(config()).unwrap();
        assert!(!gateway.is_running());

        gateway.start();
        gateway.start();
        assert!(gateway.is_running());

        gateway.shutdown().await;
        assert!(!gateway.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_pending_batches() {
        let mut cfg = config();
        cfg.batch.max_wait_time = Duration::from_secs(60);
        let gateway = Arc::new(Gateway::new(cfg).unwrap());
        gateway.start();

        let calls = Arc::new(AtomicU32::new(0));
        let pending = {
            let gateway = Arc::clone(&gateway);
            let op = counting(&calls);
            tokio::spawn(async move { gateway.call(request(json!({})), CallOptions::batched(), op).await })
        };
        for _ in 0..10 {
            if gateway.performance_summary().pending_requests == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(gateway.performance_summary().pending_requests, 1);
        let queues = gateway.health().batches.queues;
        assert_eq!(queues[&request(json!({})).batch_key()].pending, 1);

        gateway.shutdown().await;
        assert!(pending.await.unwrap().is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
