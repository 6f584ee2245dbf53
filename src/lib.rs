//! # Resilient Gateway
//!
//! A gateway for calls to slow, rate-limited, occasionally failing remote
//! services. Every call goes through a result cache, an optional batching
//! window, a per-service circuit breaker and a retry loop, and ends up in
//! the request monitor.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Gateway::call                         │
//! │  • OperationRequest { service, operation, payload, ... }   │
//! │  • CallOptions { cache, batch }                            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      CacheManager                           │
//! │  • Deterministic keys: service:operation:digest            │
//! │  • Per-operation TTL and sampling policies                 │
//! │  • LRU / LFU / TTL / hybrid eviction under a byte budget   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ miss
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Batcher                             │
//! │  • Per service:operation queues, priority ordered          │
//! │  • Size / time / hybrid dispatch, concurrency capped       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ErrorHandler                           │
//! │  • Retry with backoff + jitter, honouring retry-after      │
//! │  • Circuit breaker per service, checked on every attempt   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Monitor                             │
//! │  • Per service/operation stats, history, alerts, health    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use resilient_gateway::{CallOptions, Fault, Gateway, GatewayConfig, OperationRequest};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let gateway = Gateway::new(GatewayConfig::default()).expect("valid config");
//!     gateway.start();
//!
//!     let request = OperationRequest::new("vision", "describe", json!({"url": "field.png"}));
//!     let result = gateway
//!         .call(request, CallOptions::default(), || async {
//!             // the remote call goes here
//!             Ok::<_, Fault>(json!({"label": "wheat"}))
//!         })
//!         .await;
//!     println!("{result:?}");
//!
//!     println!("{}", serde_json::to_string_pretty(&gateway.health()).unwrap());
//!     gateway.shutdown().await;
//! }
//! ```
//!
//! ## Modules
//!
//! - [`gateway`]: The [`Gateway`] orchestrating all components
//! - [`cache`]: Result cache and policy manager
//! - [`batching`]: Request batcher and single-assignment result slots
//! - [`resilience`]: Error classification, circuit breakers, retry
//! - [`monitor`]: Request statistics, history, alerts
//! - [`config`]: [`GatewayConfig`] and validation
//! - [`metrics`]: Counters, gauges and histograms via the `metrics` crate

pub mod batching;
pub mod cache;
pub mod compression;
pub mod config;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod monitor;
pub mod resilience;

pub use batching::{BatchConfig, BatchError, BatchStrategy, Batcher, Dispatch, FlushReason};
pub use cache::{CacheConfig, CacheManager, CachePolicy, EvictionStrategy, Invalidation};
pub use config::{ConfigError, GatewayConfig, ServiceConfig};
pub use error::GatewayError;
pub use gateway::{CallOptions, Gateway, HealthReport, OperationRequest, PerformanceSummary, Recommendation};
pub use monitor::{AlertMetric, AlertSink, AlertThreshold, HealthStatus, Monitor, MonitorConfig, Outcome};
pub use resilience::{
    classify, CircuitBreaker, CircuitConfig, CircuitError, CircuitState, ErrorHandler, ErrorKind, Fault,
    RetryConfig,
};
