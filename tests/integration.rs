//! Integration Tests for the Resilient Gateway
//!
//! End-to-end scenarios through the public API only. Time is paused so
//! every delay (operation latency, retry backoff, batch windows, breaker
//! recovery) is deterministic.
//!
//! # Running Tests
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//! - `happy_*` - Normal operation: direct, cached, batched calls, lifecycle
//! - `failure_*` - Failure scenarios: retries, breaker trips and recovery

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use parking_lot::Mutex;
use serde_json::{json, Value};

use resilient_gateway::{
    AlertMetric, BatchConfig, BatchStrategy, CacheConfig, CallOptions, CircuitConfig, CircuitState,
    ErrorKind, Fault, Gateway, GatewayConfig, GatewayError, HealthStatus, OperationRequest,
    RetryConfig,
};

// =============================================================================
// Helpers
// =============================================================================

fn base_config() -> GatewayConfig {
    GatewayConfig {
        cache: CacheConfig {
            compression_enabled: false,
            ..CacheConfig::default()
        },
        retry: RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter_enabled: false,
            ..RetryConfig::default()
        },
        circuit_breaker: CircuitConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(5),
            success_threshold: 2,
            half_open_max_calls: 1,
        },
        ..GatewayConfig::default()
    }
}

fn request(service: &str, operation: &str, payload: Value) -> OperationRequest {
    OperationRequest::new(service, operation, payload)
}

type Op = Arc<dyn Fn() -> BoxFuture<'static, Result<Value, Fault>> + Send + Sync>;

/// An operation that sleeps `latency` and then returns `{"call": n}`.
fn slow_op(latency: Duration, calls: &Arc<AtomicU32>) -> Op {
    let calls = Arc::clone(calls);
    Arc::new(move || {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        Box::pin(async move {
            tokio::time::sleep(latency).await;
            Ok(json!({ "call": n }))
        })
    })
}

/// An operation that fails with `fault` for the first `failures` calls.
fn flaky_op(failures: u32, fault: Fault, calls: &Arc<AtomicU32>) -> Op {
    let calls = Arc::clone(calls);
    Arc::new(move || {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        let fault = fault.clone();
        Box::pin(async move {
            if n <= failures {
                Err(fault)
            } else {
                Ok(json!({ "attempt": n }))
            }
        })
    })
}

async fn run(gateway: &Gateway, req: OperationRequest, options: CallOptions, op: Op) -> Result<Value, GatewayError> {
    gateway.call(req, options, move || op()).await
}

// =============================================================================
// Happy Path
// =============================================================================

#[tokio::test(start_paused = true)]
async fn happy_ten_concurrent_direct_calls() {
    let gateway = Gateway::new(base_config()).unwrap();
    let calls = Arc::new(AtomicU32::new(0));

    let results = join_all((0..10).map(|i| {
        run(
            &gateway,
            request("vision", "describe", json!({ "i": i })),
            CallOptions::direct(),
            slow_op(Duration::from_millis(50), &calls),
        )
    }))
    .await;

    assert!(results.iter().all(Result::is_ok));
    let stats = &gateway.monitor().service_stats("vision")["describe"];
    assert_eq!(stats.total_requests, 10);
    assert_eq!(stats.successful_requests, 10);
    assert_eq!(stats.failed_requests, 0);
    assert!((stats.average_latency_ms - 50.0).abs() < 5.0, "avg = {}", stats.average_latency_ms);
    assert_eq!(gateway.health().status, HealthStatus::Healthy);
}

#[tokio::test(start_paused = true)]
async fn happy_cached_result_is_reused_until_ttl() {
    let mut config = base_config();
    config.cache.default_ttl = Duration::from_secs(30);
    let gateway = Gateway::new(config).unwrap();
    let calls = Arc::new(AtomicU32::new(0));
    let req = || request("pricing", "quote", json!({"crop": "wheat", "region": "north"}));

    let first = run(&gateway, req(), CallOptions::cached(), slow_op(Duration::from_millis(10), &calls))
        .await
        .unwrap();
    let second = run(&gateway, req(), CallOptions::cached(), slow_op(Duration::from_millis(10), &calls))
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(31)).await;

    let third = run(&gateway, req(), CallOptions::cached(), slow_op(Duration::from_millis(10), &calls))
        .await
        .unwrap();
    assert_eq!(third, json!({"call": 2}));
    assert_eq!(gateway.cache().service_stats()["pricing"].hits, 1);
}

#[tokio::test(start_paused = true)]
async fn happy_batches_split_by_size() {
    let mut config = base_config();
    config.batch = BatchConfig {
        max_batch_size: 3,
        max_wait_time: Duration::from_secs(1),
        strategy: BatchStrategy::Hybrid,
        priority_enabled: false,
        max_concurrent_batches: 3,
    };
    let gateway = Arc::new(Gateway::new(config).unwrap());
    let calls = Arc::new(AtomicU32::new(0));

    let handles: Vec<_> = (0..5)
        .map(|i| {
            let gateway = Arc::clone(&gateway);
            let op = slow_op(Duration::from_millis(10), &calls);
            tokio::spawn(async move {
                run(&gateway, request("vision", "describe", json!({ "i": i })), CallOptions::batched(), op).await
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    let batches = gateway.health().batches;
    assert_eq!(batches.batches_dispatched, 2);
    assert_eq!(batches.size_flushes, 1);
    assert_eq!(batches.time_flushes, 1);
    assert_eq!(batches.requests_dispatched, 5);
}

#[tokio::test(start_paused = true)]
async fn happy_lone_request_waits_for_window() {
    let mut config = base_config();
    config.batch.max_wait_time = Duration::from_secs(1);
    let gateway = Gateway::new(config).unwrap();
    let calls = Arc::new(AtomicU32::new(0));

    let started = tokio::time::Instant::now();
    run(
        &gateway,
        request("vision", "describe", json!({})),
        CallOptions::batched(),
        slow_op(Duration::ZERO, &calls),
    )
    .await
    .unwrap();

    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(1) && waited < Duration::from_millis(1100), "waited {waited:?}");
}

#[tokio::test(start_paused = true)]
async fn happy_config_from_json_drives_gateway() {
    let config = GatewayConfig::from_json_str(
        r#"{
            "batch": {"max_batch_size": 2, "max_wait_time_ms": 200},
            "cache": {"compression_enabled": false},
            "retry": {"max_attempts": 2, "base_delay_ms": 10, "jitter_enabled": false},
            "services": {
                "weather": {
                    "cache_policies": {"forecast": {"ttl_ms": 1000}},
                    "alerts": [{"metric": "error_rate", "limit": 30.0}]
                }
            }
        }"#,
    )
    .unwrap();
    let gateway = Gateway::new(config).unwrap();
    let alerts = Arc::new(Mutex::new(Vec::new()));
    let sink_alerts = Arc::clone(&alerts);
    gateway.add_alert_sink(Arc::new(move |service: &str, metric: AlertMetric, observed: f64, _: f64| {
        sink_alerts.lock().push((service.to_string(), metric, observed));
    }));

    let calls = Arc::new(AtomicU32::new(0));
    let forecast = || request("weather", "forecast", json!({"day": 1}));
    run(&gateway, forecast(), CallOptions::cached(), slow_op(Duration::ZERO, &calls)).await.unwrap();
    tokio::time::advance(Duration::from_millis(1500)).await;
    run(&gateway, forecast(), CallOptions::cached(), slow_op(Duration::ZERO, &calls)).await.unwrap();
    // per-operation TTL of 1s expired the first result
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let failing = Arc::new(AtomicU32::new(0));
    let _ = run(
        &gateway,
        request("weather", "forecast", json!({"day": 2})),
        CallOptions::direct(),
        flaky_op(u32::MAX, Fault::credentials("revoked"), &failing),
    )
    .await;

    let alerts = alerts.lock();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].1, AlertMetric::ErrorRate);
}

#[tokio::test(start_paused = true)]
async fn happy_lifecycle_and_reports() {
    let gateway = Gateway::new(base_config()).unwrap();
    gateway.start();

    let calls = Arc::new(AtomicU32::new(0));
    run(&gateway, request("a", "x", json!(1)), CallOptions::default(), slow_op(Duration::ZERO, &calls))
        .await
        .unwrap();

    let report = serde_json::to_value(gateway.health()).unwrap();
    assert_eq!(report["status"], "healthy");
    assert_eq!(report["requests"]["total_requests"], 1);

    let summary = gateway.performance_summary();
    assert_eq!(summary.pending_requests, 0);
    assert_eq!(summary.cache_entries, 1);

    let recent = gateway.monitor().recent_requests(Some("a"), 10);
    assert_eq!(recent.len(), 1);

    gateway.shutdown().await;
    assert!(!gateway.is_running());
}

// =============================================================================
// Failure Scenarios
// =============================================================================

#[tokio::test(start_paused = true)]
async fn failure_transient_errors_are_retried_with_backoff() {
    let gateway = Gateway::new(base_config()).unwrap();
    let calls = Arc::new(AtomicU32::new(0));

    let started = tokio::time::Instant::now();
    let result = run(
        &gateway,
        request("speech", "transcribe", json!({})),
        CallOptions::direct(),
        flaky_op(2, Fault::transport("connection reset"), &calls),
    )
    .await;

    assert_eq!(result.unwrap(), json!({"attempt": 3}));
    // 100ms then 200ms of backoff
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(300) && elapsed < Duration::from_millis(320), "elapsed {elapsed:?}");
    let errors = &gateway.error_handler().error_stats()["speech"];
    assert_eq!(errors.by_kind[&ErrorKind::Network], 2);
}

#[tokio::test(start_paused = true)]
async fn failure_authentication_is_not_retried() {
    let gateway = Gateway::new(base_config()).unwrap();
    let calls = Arc::new(AtomicU32::new(0));

    let err = run(
        &gateway,
        request("speech", "transcribe", json!({})),
        CallOptions::direct(),
        flaky_op(u32::MAX, Fault::api(401, "bad token"), &calls),
    )
    .await
    .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(err.kind(), Some(ErrorKind::Authentication));
    assert!(matches!(err, GatewayError::Failed { .. }));
}

#[tokio::test(start_paused = true)]
async fn failure_exhausted_retries_are_distinct() {
    let gateway = Gateway::new(base_config()).unwrap();
    let calls = Arc::new(AtomicU32::new(0));

    let err = run(
        &gateway,
        request("speech", "transcribe", json!({})),
        CallOptions::direct(),
        flaky_op(u32::MAX, Fault::api(429, "quota window"), &calls),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, GatewayError::RetriesExhausted { attempts: 3, kind: ErrorKind::RateLimit, .. }));
    let stats = &gateway.monitor().service_stats("speech")["transcribe"];
    assert_eq!(stats.retries_exhausted, 1);
    assert_eq!(stats.rate_limit_hits, 3);
}

#[tokio::test(start_paused = true)]
async fn failure_breaker_opens_and_recovers() {
    let gateway = Gateway::new(base_config()).unwrap();
    let failing = Arc::new(AtomicU32::new(0));

    for _ in 0..3 {
        let _ = run(
            &gateway,
            request("vision", "describe", json!({})),
            CallOptions::direct(),
            flaky_op(u32::MAX, Fault::quota("daily limit"), &failing),
        )
        .await;
    }
    assert_eq!(gateway.health().breakers["vision"].state, CircuitState::Open);

    let calls = Arc::new(AtomicU32::new(0));
    let rejected = run(
        &gateway,
        request("vision", "describe", json!({})),
        CallOptions::direct(),
        slow_op(Duration::ZERO, &calls),
    )
    .await
    .unwrap_err();
    assert!(rejected.is_breaker_open());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(gateway.health().status, HealthStatus::Critical);

    tokio::time::advance(Duration::from_secs(6)).await;

    for _ in 0..2 {
        run(
            &gateway,
            request("vision", "describe", json!({})),
            CallOptions::direct(),
            slow_op(Duration::ZERO, &calls),
        )
        .await
        .unwrap();
    }
    assert_eq!(gateway.health().breakers["vision"].state, CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn failure_one_service_does_not_trip_another() {
    let gateway = Gateway::new(base_config()).unwrap();
    let failing = Arc::new(AtomicU32::new(0));

    for _ in 0..3 {
        let _ = run(
            &gateway,
            request("vision", "describe", json!({})),
            CallOptions::direct(),
            flaky_op(u32::MAX, Fault::credentials("expired"), &failing),
        )
        .await;
    }

    let calls = Arc::new(AtomicU32::new(0));
    let ok = run(
        &gateway,
        request("speech", "transcribe", json!({})),
        CallOptions::direct(),
        slow_op(Duration::ZERO, &calls),
    )
    .await;
    assert!(ok.is_ok());

    let health = gateway.health();
    assert_eq!(health.tripped_services(), vec!["vision"]);
    assert_eq!(health.requests.services_with_issues.len(), 1);
}
