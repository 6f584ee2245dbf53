// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory result store.
//!
//! Bounded by a byte budget and per-entry TTL:
//!
//! ```text
//! set(key, value, ttl, size)
//!       │
//!       ├─→ size > 10% of max_size ─→ rejected (TooLarge)
//!       │
//!       ├─→ key present ─→ old entry removed first
//!       │
//!       └─→ evict by strategy until current + size <= max_size, insert
//!
//! get(key)
//!       ├─→ absent              ─→ miss
//!       ├─→ now - created > ttl ─→ evicted, miss
//!       └─→ hit (LRU/Hybrid: promote to most recently used)
//! ```
//!
//! All state sits behind one `parking_lot` mutex, so reads and writes of
//! the same key are linearised.

use super::{CacheConfig, CacheError, EvictionStrategy};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// Largest share of `max_size` a single entry may take.
const MAX_ENTRY_RATIO: f64 = 0.1;

/// Cache entry with the metadata eviction needs
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub created_at: Instant,
    pub last_accessed_at: Instant,
    pub access_count: u64,
    pub ttl: Duration,
    pub size_bytes: usize,
    /// Position in the recency index
    tick: u64,
}

impl<V> CacheEntry<V> {
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }
}

/// Which keys an invalidation removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    /// Every key for a service
    Service(String),
    /// Every key for one (service, operation)
    Operation { service: String, operation: String },
    /// Every key containing the substring
    Pattern(String),
}

impl Invalidation {
    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::Service(service) => key
                .strip_prefix(service.as_str())
                .is_some_and(|rest| rest.starts_with(':')),
            Self::Operation { service, operation } => key
                .strip_prefix(service.as_str())
                .and_then(|rest| rest.strip_prefix(':'))
                .and_then(|rest| rest.strip_prefix(operation.as_str()))
                .is_some_and(|rest| rest.starts_with(':')),
            Self::Pattern(pattern) => key.contains(pattern.as_str()),
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries removed to make room or by invalidation
    pub evictions: u64,
    /// Entries removed because their TTL elapsed
    pub expirations: u64,
    pub entry_count: usize,
    pub size_bytes: usize,
    pub max_size: usize,
    /// Hit rate (0.0 - 1.0)
    pub hit_rate: f64,
    /// Share of the byte budget in use (0.0 - 1.0)
    pub utilization: f64,
}

struct CacheInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// tick → key, oldest first
    recency: BTreeMap<u64, String>,
    next_tick: u64,
    current_size: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl<V> CacheInner<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            next_tick: 0,
            current_size: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
            expirations: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.tick);
        self.current_size = self.current_size.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    fn promote(&mut self, key: &str) {
        let tick = self.tick();
        if let Some(entry) = self.entries.get_mut(key) {
            self.recency.remove(&entry.tick);
            entry.tick = tick;
            self.recency.insert(tick, key.to_string());
        }
    }

    fn victim(&self, strategy: EvictionStrategy, now: Instant) -> Option<String> {
        let oldest = || self.recency.values().next().cloned();
        match strategy {
            EvictionStrategy::Lru => oldest(),
            EvictionStrategy::Lfu => self
                .entries
                .values()
                .min_by_key(|e| (e.access_count, e.tick))
                .map(|e| e.key.clone()),
            EvictionStrategy::Ttl => self
                .entries
                .values()
                .min_by_key(|e| (e.created_at, e.tick))
                .map(|e| e.key.clone()),
            EvictionStrategy::Hybrid => self
                .recency
                .values()
                .find(|key| self.entries.get(*key).is_some_and(|e| e.is_expired(now)))
                .cloned()
                .or_else(oldest),
        }
    }
}

/// TTL and size bounded store.
pub struct Cache<V> {
    config: CacheConfig,
    inner: Mutex<CacheInner<V>>,
}

impl<V: Clone> Cache<V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(CacheInner::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Largest entry `set` accepts.
    #[must_use]
    pub fn max_entry_size(&self) -> usize {
        (self.config.max_size as f64 * MAX_ENTRY_RATIO) as usize
    }

    /// Look up a live entry. Expired entries are removed on access.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let expired = match inner.entries.get(key) {
            None => {
                inner.misses += 1;
                crate::metrics::record_cache_lookup("miss");
                return None;
            }
            Some(entry) => entry.is_expired(now),
        };

        if expired {
            inner.remove(key);
            inner.expirations += 1;
            inner.misses += 1;
            crate::metrics::record_cache_lookup("expired");
            self.publish_gauges(&inner);
            return None;
        }

        if matches!(self.config.strategy, EvictionStrategy::Lru | EvictionStrategy::Hybrid) {
            inner.promote(key);
        }
        inner.hits += 1;
        let entry = inner.entries.get_mut(key)?;
        entry.access_count = entry.access_count.saturating_add(1);
        entry.last_accessed_at = now;
        debug!(key, access_count = entry.access_count, "Cache hit");
        crate::metrics::record_cache_lookup("hit");
        Some(entry.value.clone())
    }

    /// Store `value` under `key`, charging `size_bytes` against the budget.
    ///
    /// `ttl` defaults to the configured `default_ttl`.
    pub fn set(
        &self,
        key: impl Into<String>,
        value: V,
        ttl: Option<Duration>,
        size_bytes: usize,
    ) -> Result<(), CacheError> {
        let key = key.into();
        let limit = self.max_entry_size();
        if size_bytes > limit {
            crate::metrics::record_cache_rejected(size_bytes);
            return Err(CacheError::TooLarge { size: size_bytes, limit });
        }

        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.remove(&key);

        let mut evicted = 0;
        let mut evicted_bytes = 0;
        while inner.current_size + size_bytes > self.config.max_size {
            let Some(victim) = inner.victim(self.config.strategy, now) else {
                break;
            };
            if let Some(entry) = inner.remove(&victim) {
                if entry.is_expired(now) {
                    inner.expirations += 1;
                } else {
                    inner.evictions += 1;
                }
                evicted += 1;
                evicted_bytes += entry.size_bytes;
            }
        }
        if evicted > 0 {
            debug!(evicted, evicted_bytes, "Evicted cache entries to make room");
            crate::metrics::record_eviction(evicted, evicted_bytes);
        }

        let tick = inner.tick();
        inner.recency.insert(tick, key.clone());
        inner.current_size += size_bytes;
        inner.entries.insert(
            key.clone(),
            CacheEntry {
                key,
                value,
                created_at: now,
                last_accessed_at: now,
                access_count: 0,
                ttl: ttl.unwrap_or(self.config.default_ttl),
                size_bytes,
                tick,
            },
        );
        self.publish_gauges(&inner);
        Ok(())
    }

    /// Remove one key. Returns whether it was present.
    pub fn remove(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.remove(key).is_some();
        if removed {
            self.publish_gauges(&inner);
        }
        removed
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let expired: Vec<String> = inner
            .entries
            .values()
            .filter(|e| e.is_expired(now))
            .map(|e| e.key.clone())
            .collect();

        for key in &expired {
            inner.remove(key);
        }
        inner.expirations += expired.len() as u64;
        self.publish_gauges(&inner);
        expired.len()
    }

    /// Remove every key matching `selector`. Returns how many were removed.
    pub fn invalidate(&self, selector: &Invalidation) -> usize {
        let mut inner = self.inner.lock();
        let matching: Vec<String> = inner
            .entries
            .keys()
            .filter(|key| selector.matches(key))
            .cloned()
            .collect();

        for key in &matching {
            inner.remove(key);
        }
        inner.evictions += matching.len() as u64;
        self.publish_gauges(&inner);
        info!(?selector, removed = matching.len(), "Invalidated cache entries");
        matching.len()
    }

    /// Remove everything. Counters are kept.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let removed = inner.entries.len();
        inner.entries.clear();
        inner.recency.clear();
        inner.current_size = 0;
        self.publish_gauges(&inner);
        info!(removed, "Cache cleared");
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes currently charged against the budget
    #[must_use]
    pub fn current_size(&self) -> usize {
        self.inner.lock().current_size
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let lookups = inner.hits + inner.misses;
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            expirations: inner.expirations,
            entry_count: inner.entries.len(),
            size_bytes: inner.current_size,
            max_size: self.config.max_size,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                inner.hits as f64 / lookups as f64
            },
            utilization: inner.current_size as f64 / self.config.max_size.max(1) as f64,
        }
    }

    fn publish_gauges(&self, inner: &CacheInner<V>) {
        crate::metrics::set_cache_bytes(inner.current_size);
        crate::metrics::set_cache_items(inner.entries.len());
    }
}

impl<V: Clone + Send + 'static> Cache<V> {
    /// Spawn the periodic expiry sweep. Stops when `shutdown` flips to true
    /// or its sender is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let interval = self.config.sweep_interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = cache.sweep_expired();
                        if removed > 0 {
                            debug!(removed, "Cache sweep removed expired entries");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Cache sweeper stopped");
        })
    }
}
