// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Request batching.
//!
//! Concurrent callers for the same (service, operation) are grouped into
//! batches and dispatched as one unit; each caller gets back exactly the
//! result for its own request.

pub mod batcher;
pub mod promise;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use batcher::{BatchStats, Batcher, Dispatch, QueueStats};
pub use promise::{result_slot, PendingResult, ResultSlot};

/// When a queue is dispatched at submit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStrategy {
    /// Full batches; `max_wait_time` only bounds how long a partial batch lingers
    Size,
    /// Oldest request reaching `max_wait_time`
    Time,
    /// Whichever of size or age comes first
    Hybrid,
}

/// Batch dispatch trigger reason
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushReason {
    /// Queue reached `max_batch_size`
    Size,
    /// Oldest request waited `max_wait_time`
    Time,
    /// Explicit `flush_all`
    Manual,
}

impl FlushReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Size => "size",
            Self::Time => "time",
            Self::Manual => "manual",
        }
    }
}

/// Configuration for request batching
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Dispatch once this many requests are queued for a key
    pub max_batch_size: usize,
    /// Dispatch once the oldest request has waited this long
    #[serde(rename = "max_wait_time_ms", with = "crate::config::serde_millis")]
    pub max_wait_time: Duration,
    pub strategy: BatchStrategy,
    /// Order each queue by request priority, highest first
    pub priority_enabled: bool,
    /// In-flight batches allowed per key
    pub max_concurrent_batches: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 5,
            max_wait_time: Duration::from_secs(1),
            strategy: BatchStrategy::Hybrid,
            priority_enabled: true,
            max_concurrent_batches: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    /// The dispatcher returned a different number of results than requests
    #[error("dispatch returned {got} results for {expected} requests")]
    ResultCountMismatch { expected: usize, got: usize },

    /// The batch was dropped before fulfilling this request
    #[error("batch was abandoned before producing a result")]
    Abandoned,
}
