// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One call to a remote service operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub service: String,
    pub operation: String,
    /// Request body; part of the cache key
    pub payload: Value,
    /// Higher runs first within a batch
    #[serde(default)]
    pub priority: i32,
    /// Cache-invalidation hints (e.g. hashes of sub-inputs); part of the cache key
    #[serde(default)]
    pub context: Option<Value>,
}

impl OperationRequest {
    pub fn new(service: impl Into<String>, operation: impl Into<String>, payload: Value) -> Self {
        Self {
            service: service.into(),
            operation: operation.into(),
            payload,
            priority: 0,
            context: None,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Queue key shared by requests that may be batched together.
    #[must_use]
    pub fn batch_key(&self) -> String {
        format!("{}:{}", self.service, self.operation)
    }
}

/// Per-call switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOptions {
    pub cache: bool,
    pub batch: bool,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            cache: true,
            batch: true,
        }
    }
}

impl CallOptions {
    /// Neither cached nor batched: straight through breaker and retry.
    #[must_use]
    pub fn direct() -> Self {
        Self {
            cache: false,
            batch: false,
        }
    }

    #[must_use]
    pub fn cached() -> Self {
        Self {
            cache: true,
            batch: false,
        }
    }

    #[must_use]
    pub fn batched() -> Self {
        Self {
            cache: false,
            batch: true,
        }
    }
}
