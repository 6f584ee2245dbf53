// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Result cache.
//!
//! - [`store::Cache`]: TTL and size bounded store with pluggable eviction
//! - [`manager::CacheManager`]: per-(service, operation) policies on top
//! - [`key`]: deterministic request keys

pub mod key;
pub mod manager;
pub mod store;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use key::derive_key;
pub use manager::{CacheManager, CacheTicket, Lookup, ServiceCacheStats};
pub use store::{Cache, CacheStats, Invalidation};

/// Which entry to drop when the cache is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionStrategy {
    /// Least recently used
    Lru,
    /// Lowest access count
    Lfu,
    /// Earliest created
    Ttl,
    /// Any expired entry first, else least recently used
    Hybrid,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Byte budget for all entries
    pub max_size: usize,
    #[serde(rename = "default_ttl_ms", with = "crate::config::serde_millis")]
    pub default_ttl: Duration,
    pub strategy: EvictionStrategy,
    #[serde(rename = "sweep_interval_ms", with = "crate::config::serde_millis")]
    pub sweep_interval: Duration,
    /// Charge entries by compressed size (needs the `compression` feature)
    pub compression_enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 50 * 1024 * 1024,
            default_ttl: Duration::from_secs(1800),
            strategy: EvictionStrategy::Hybrid,
            sweep_interval: Duration::from_secs(300),
            compression_enabled: true,
        }
    }
}

/// Per-(service, operation) caching policy.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CachePolicy {
    /// Overrides `CacheConfig::default_ttl`
    #[serde(rename = "ttl_ms", with = "crate::config::serde_millis::option")]
    pub ttl: Option<Duration>,
    /// Fraction of lookups that consult the cache (0.0 - 1.0)
    pub sample_rate: f64,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl: None,
            sample_rate: 1.0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Entry exceeds the per-entry share of the budget
    #[error("entry of {size} bytes exceeds the per-entry limit of {limit} bytes")]
    TooLarge { size: usize, limit: usize },

    #[error(transparent)]
    Sizing(#[from] crate::compression::CompressionError),
}
