// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded request history.

use super::Outcome;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// One completed request
#[derive(Debug, Clone, Serialize)]
pub struct RequestRecord {
    pub request_id: u64,
    pub service: String,
    pub operation: String,
    pub outcome: Outcome,
    #[serde(rename = "latency_ms", serialize_with = "crate::config::serde_millis::serialize")]
    pub latency: Duration,
    #[serde(skip)]
    pub recorded_at: Instant,
}

/// Ring buffer of the most recent requests; the oldest record is dropped
/// once `capacity` is reached.
#[derive(Debug)]
pub struct History {
    capacity: usize,
    records: VecDeque<RequestRecord>,
    next_id: u64,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: VecDeque::with_capacity(capacity),
            next_id: 1,
        }
    }

    /// Append a record, returning its id.
    pub fn push(&mut self, service: &str, operation: &str, outcome: Outcome, latency: Duration) -> u64 {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        let request_id = self.next_id;
        self.next_id += 1;
        self.records.push_back(RequestRecord {
            request_id,
            service: service.to_string(),
            operation: operation.to_string(),
            outcome,
            latency,
            recorded_at: Instant::now(),
        });
        request_id
    }

    /// The last `limit` records, oldest first, optionally for one service.
    #[must_use]
    pub fn recent(&self, service: Option<&str>, limit: usize) -> Vec<RequestRecord> {
        let mut matching: Vec<RequestRecord> = self
            .records
            .iter()
            .rev()
            .filter(|r| service.map_or(true, |s| r.service == s))
            .take(limit)
            .cloned()
            .collect();
        matching.reverse();
        matching
    }

    /// Drop records older than `retention`. Returns how many were removed.
    pub fn prune(&mut self, retention: Duration) -> usize {
        let now = Instant::now();
        let before = self.records.len();
        while self
            .records
            .front()
            .is_some_and(|r| now.saturating_duration_since(r.recorded_at) > retention)
        {
            self.records.pop_front();
        }
        before - self.records.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
