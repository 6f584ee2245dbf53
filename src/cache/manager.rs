// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Policy layer over the result cache.
//!
//! Each (service, operation) may carry a [`CachePolicy`] with its own TTL
//! and a sample rate. A lookup that is sampled out behaves like a miss: the
//! caller runs the operation and the fresh result is still stored. Expiry
//! and eviction are always left to the underlying [`Cache`].

use super::key::derive_key;
use super::store::{Cache, CacheStats, Invalidation};
use super::{CacheConfig, CacheError, CachePolicy};
use dashmap::DashMap;
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Result of a policy-aware lookup.
#[derive(Debug)]
pub enum Lookup {
    Hit(Value),
    /// Run the operation, then hand the ticket back to [`CacheManager::store`].
    Miss(CacheTicket),
}

/// Where and for how long a fresh result should be cached.
#[derive(Debug, Clone)]
pub struct CacheTicket {
    key: String,
    service: String,
    ttl: Option<Duration>,
}

impl CacheTicket {
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

#[derive(Default)]
struct ServiceCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    bypassed: AtomicU64,
}

/// Per-service cache effectiveness.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServiceCacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Lookups skipped by sampling
    pub bypassed: u64,
    /// Hit rate over hits + misses (0.0 - 1.0)
    pub hit_rate: f64,
}

pub struct CacheManager {
    cache: Arc<Cache<Value>>,
    /// (service, operation) → policy
    policies: HashMap<(String, String), CachePolicy>,
    per_service: DashMap<String, ServiceCounters>,
}

impl CacheManager {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_policies(config, HashMap::new())
    }

    pub fn with_policies(config: CacheConfig, policies: HashMap<(String, String), CachePolicy>) -> Self {
        Self {
            cache: Arc::new(Cache::new(config)),
            policies,
            per_service: DashMap::new(),
        }
    }

    /// The underlying store
    #[must_use]
    pub fn cache(&self) -> &Arc<Cache<Value>> {
        &self.cache
    }

    /// Policy for (service, operation); the default policy if none is configured.
    #[must_use]
    pub fn policy(&self, service: &str, operation: &str) -> CachePolicy {
        self.policies
            .get(&(service.to_string(), operation.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn lookup(
        &self,
        service: &str,
        operation: &str,
        payload: &Value,
        context: Option<&Value>,
    ) -> Lookup {
        let policy = self.policy(service, operation);
        let ticket = CacheTicket {
            key: derive_key(service, operation, payload, context),
            service: service.to_string(),
            ttl: policy.ttl,
        };

        let counters = self.per_service.entry(service.to_string()).or_default();
        if !sampled(policy.sample_rate) {
            counters.bypassed.fetch_add(1, Ordering::Relaxed);
            debug!(service, operation, "Cache lookup sampled out");
            return Lookup::Miss(ticket);
        }

        match self.cache.get(&ticket.key) {
            Some(value) => {
                counters.hits.fetch_add(1, Ordering::Relaxed);
                Lookup::Hit(value)
            }
            None => {
                counters.misses.fetch_add(1, Ordering::Relaxed);
                Lookup::Miss(ticket)
            }
        }
    }

    /// Cache a fresh result under the ticket's key and TTL.
    pub fn store(&self, ticket: CacheTicket, value: &Value) -> Result<(), CacheError> {
        let size = crate::compression::estimate_size(value, self.cache.config().compression_enabled)?;
        self.cache.set(ticket.key, value.clone(), ticket.ttl, size)?;
        debug!(service = %ticket.service, size, "Cached result");
        Ok(())
    }

    pub fn invalidate(&self, selector: &Invalidation) -> usize {
        self.cache.invalidate(selector)
    }

    pub fn clear(&self) -> usize {
        self.cache.clear()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    #[must_use]
    pub fn service_stats(&self) -> BTreeMap<String, ServiceCacheStats> {
        self.per_service
            .iter()
            .map(|entry| {
                let hits = entry.hits.load(Ordering::Relaxed);
                let misses = entry.misses.load(Ordering::Relaxed);
                let lookups = hits + misses;
                let stats = ServiceCacheStats {
                    hits,
                    misses,
                    bypassed: entry.bypassed.load(Ordering::Relaxed),
                    hit_rate: if lookups == 0 { 0.0 } else { hits as f64 / lookups as f64 },
                };
                (entry.key().clone(), stats)
            })
            .collect()
    }
}

fn sampled(rate: f64) -> bool {
    if rate >= 1.0 {
        return true;
    }
    if rate <= 0.0 {
        return false;
    }
    rand::thread_rng().gen::<f64>() < rate
}
