//! Configuration for the gateway.
//!
//! Every struct deserializes with `#[serde(default)]`, so a config only has
//! to name what it changes. Durations are written in milliseconds
//! (`*_ms` keys).
//!
//! # Example
//!
//! ```
//! use resilient_gateway::GatewayConfig;
//! use std::time::Duration;
//!
//! // Minimal config (uses defaults)
//! let config = GatewayConfig::default();
//! assert_eq!(config.cache.max_size, 50 * 1024 * 1024); // 50 MB
//!
//! // Per-service overrides; unknown services use the baseline
//! let config = GatewayConfig::from_json_str(r#"{
//!     "batch": { "max_batch_size": 8, "max_wait_time_ms": 250 },
//!     "services": {
//!         "vision": {
//!             "retry": { "max_attempts": 5 },
//!             "cache_policies": { "describe": { "ttl_ms": 60000 } },
//!             "alerts": [ { "metric": "error_rate", "limit": 10.0 } ]
//!         }
//!     }
//! }"#).unwrap();
//!
//! assert_eq!(config.batch.max_wait_time, Duration::from_millis(250));
//! assert_eq!(config.retry_for("vision").max_attempts, 5);
//! assert_eq!(config.retry_for("search").max_attempts, 3);
//! ```

use crate::batching::BatchConfig;
use crate::cache::{CacheConfig, CachePolicy};
use crate::monitor::{AlertThreshold, MonitorConfig};
use crate::resilience::{CircuitConfig, RetryConfig};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: String },

    #[error("{field} must be within [0, 1], got {value}")]
    OutOfRange { field: String, value: f64 },

    #[error("{field}: base_delay {base:?} exceeds max_delay {max:?}")]
    DelayOrder {
        field: String,
        base: Duration,
        max: Duration,
    },

    #[error("{field}: backoff_factor must be at least 1, got {factor}")]
    BackoffFactor { field: String, factor: f64 },

    #[error("{field}: alert limit must be a non-negative number, got {limit}")]
    AlertLimit { field: String, limit: f64 },

    #[error("failed to parse config: {0}")]
    Parse(String),
}

/// Per-service overrides.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Replaces the baseline retry config for this service
    pub retry: Option<RetryConfig>,
    /// Replaces the baseline circuit breaker config for this service
    pub circuit_breaker: Option<CircuitConfig>,
    /// Cache policy per operation name
    pub cache_policies: HashMap<String, CachePolicy>,
    pub alerts: Vec<AlertThreshold>,
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub batch: BatchConfig,
    pub cache: CacheConfig,
    /// Baseline retry config
    pub retry: RetryConfig,
    /// Baseline circuit breaker config
    pub circuit_breaker: CircuitConfig,
    pub monitor: MonitorConfig,
    pub services: HashMap<String, ServiceConfig>,
}

impl GatewayConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Retry config for `service`, falling back to the baseline.
    #[must_use]
    pub fn retry_for(&self, service: &str) -> &RetryConfig {
        self.services
            .get(service)
            .and_then(|s| s.retry.as_ref())
            .unwrap_or(&self.retry)
    }

    /// Circuit breaker config for `service`, falling back to the baseline.
    #[must_use]
    pub fn circuit_for(&self, service: &str) -> &CircuitConfig {
        self.services
            .get(service)
            .and_then(|s| s.circuit_breaker.as_ref())
            .unwrap_or(&self.circuit_breaker)
    }

    /// Check every section; the first problem found is returned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero("batch.max_batch_size", self.batch.max_batch_size as u64)?;
        non_zero("batch.max_concurrent_batches", self.batch.max_concurrent_batches as u64)?;

        non_zero("cache.max_size", self.cache.max_size as u64)?;
        non_zero_duration("cache.sweep_interval", self.cache.sweep_interval)?;

        non_zero("monitor.history_capacity", self.monitor.history_capacity as u64)?;
        non_zero("monitor.alert_window", self.monitor.alert_window as u64)?;
        non_zero_duration("monitor.sweep_interval", self.monitor.sweep_interval)?;

        validate_retry("retry", &self.retry)?;
        validate_circuit("circuit_breaker", &self.circuit_breaker)?;

        for (name, service) in &self.services {
            if let Some(retry) = &service.retry {
                validate_retry(&format!("services.{name}.retry"), retry)?;
            }
            if let Some(circuit) = &service.circuit_breaker {
                validate_circuit(&format!("services.{name}.circuit_breaker"), circuit)?;
            }
            for (operation, policy) in &service.cache_policies {
                if !(0.0..=1.0).contains(&policy.sample_rate) {
                    return Err(ConfigError::OutOfRange {
                        field: format!("services.{name}.cache_policies.{operation}.sample_rate"),
                        value: policy.sample_rate,
                    });
                }
            }
            for alert in &service.alerts {
                if !alert.limit.is_finite() || alert.limit < 0.0 {
                    return Err(ConfigError::AlertLimit {
                        field: format!("services.{name}.alerts.{}", alert.metric),
                        limit: alert.limit,
                    });
                }
            }
        }

        Ok(())
    }
}

fn non_zero(field: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Zero { field: field.to_string() });
    }
    Ok(())
}

fn non_zero_duration(field: &str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::Zero { field: field.to_string() });
    }
    Ok(())
}

fn validate_retry(field: &str, retry: &RetryConfig) -> Result<(), ConfigError> {
    non_zero(&format!("{field}.max_attempts"), u64::from(retry.max_attempts))?;
    if retry.base_delay > retry.max_delay {
        return Err(ConfigError::DelayOrder {
            field: field.to_string(),
            base: retry.base_delay,
            max: retry.max_delay,
        });
    }
    if !(retry.backoff_factor >= 1.0) || !retry.backoff_factor.is_finite() {
        return Err(ConfigError::BackoffFactor {
            field: field.to_string(),
            factor: retry.backoff_factor,
        });
    }
    Ok(())
}

fn validate_circuit(field: &str, circuit: &CircuitConfig) -> Result<(), ConfigError> {
    non_zero(&format!("{field}.failure_threshold"), u64::from(circuit.failure_threshold))?;
    non_zero(&format!("{field}.success_threshold"), u64::from(circuit.success_threshold))?;
    non_zero(&format!("{field}.half_open_max_calls"), u64::from(circuit.half_open_max_calls))?;
    Ok(())
}

/// Serde helpers for durations written as integer milliseconds.
pub mod serde_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }

    /// Same, for `Option<Duration>` (`null` or absent means `None`).
    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::AlertMetric;

    #[test]
    fn test_default_config_is_valid() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch.max_batch_size, 5);
        assert_eq!(config.cache.default_ttl, Duration::from_secs(1800));
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.monitor.history_capacity, 1000);
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config = GatewayConfig::from_json_str("{}").unwrap();
        assert_eq!(config, GatewayConfig::default());
    }

    #[test]
    fn test_service_overrides_fall_back_to_baseline() {
        let config = GatewayConfig::from_json_str(
            r#"{"services": {"vision": {"circuit_breaker": {"failure_threshold": 2}}}}"#,
        )
        .unwrap();

        assert_eq!(config.circuit_for("vision").failure_threshold, 2);
        assert_eq!(config.circuit_for("other").failure_threshold, 5);
        assert_eq!(config.retry_for("vision"), &config.retry);
    }

    #[test]
    fn test_alert_and_policy_parsing() {
        let config = GatewayConfig::from_json_str(
            r#"{"services": {"vision": {
                "cache_policies": {"describe": {"ttl_ms": 500, "sample_rate": 0.5}},
                "alerts": [{"metric": "average_latency", "limit": 2.5}]
            }}}"#,
        )
        .unwrap();

        let vision = &config.services["vision"];
        let policy = &vision.cache_policies["describe"];
        assert_eq!(policy.ttl, Some(Duration::from_millis(500)));
        assert!((policy.sample_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(vision.alerts[0].metric, AlertMetric::AverageLatency);
    }

    #[test]
    fn test_rejects_zero_sizes() {
        let mut config = GatewayConfig::default();
        config.batch.max_batch_size = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::Zero { field: "batch.max_batch_size".into() })
        );

        let mut config = GatewayConfig::default();
        config.cache.max_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Zero { .. })));
    }

    #[test]
    fn test_rejects_bad_retry() {
        let mut config = GatewayConfig::default();
        config.retry.base_delay = Duration::from_secs(120);
        assert!(matches!(config.validate(), Err(ConfigError::DelayOrder { .. })));

        let mut config = GatewayConfig::default();
        config.retry.backoff_factor = 0.5;
        assert!(matches!(config.validate(), Err(ConfigError::BackoffFactor { .. })));
    }

    #[test]
    fn test_rejects_bad_service_overrides() {
        let err = GatewayConfig::from_json_str(
            r#"{"services": {"vision": {"cache_policies": {"describe": {"sample_rate": 1.5}}}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { .. }));

        let err = GatewayConfig::from_json_str(
            r#"{"services": {"vision": {"circuit_breaker": {"success_threshold": 0}}}}"#,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Zero { field: "services.vision.circuit_breaker.success_threshold".into() }
        );
    }

    #[test]
    fn test_parse_error_is_reported() {
        let err = GatewayConfig::from_json_str(r#"{"batch": {"max_batch_size": "lots"}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
