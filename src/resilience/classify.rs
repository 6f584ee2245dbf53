// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Fault classification.
//!
//! Remote operations report failures as a [`Fault`]. The retry loop, the
//! circuit breaker and the monitor never look at faults directly; they work
//! with the semantic [`ErrorKind`] produced by [`classify`].
//!
//! # Example
//!
//! ```
//! use resilient_gateway::resilience::classify::{classify, extract_retry_after, ErrorKind, Fault};
//! use std::time::Duration;
//!
//! let fault = Fault::api(429, "slow down").with_retry_after(Duration::from_secs(2));
//! assert_eq!(classify(&fault), ErrorKind::RateLimit);
//! assert_eq!(extract_retry_after(&fault), Some(Duration::from_secs(2)));
//!
//! assert_eq!(classify(&Fault::credentials("token expired")), ErrorKind::Authentication);
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Semantic failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Authentication,
    RateLimit,
    Network,
    QuotaExceeded,
    ServiceUnavailable,
    Timeout,
    ApiFault,
    Unknown,
}

impl ErrorKind {
    /// Every kind, in declaration order.
    pub const ALL: [ErrorKind; 8] = [
        Self::Authentication,
        Self::RateLimit,
        Self::Network,
        Self::QuotaExceeded,
        Self::ServiceUnavailable,
        Self::Timeout,
        Self::ApiFault,
        Self::Unknown,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::RateLimit => "rate_limit",
            Self::Network => "network",
            Self::QuotaExceeded => "quota_exceeded",
            Self::ServiceUnavailable => "service_unavailable",
            Self::Timeout => "timeout",
            Self::ApiFault => "api_fault",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure raised by a wrapped remote operation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Fault {
    /// The remote API answered with an error status.
    #[error("remote API returned status {status}: {message}")]
    Api {
        status: u16,
        message: String,
        /// Server-suggested delay (e.g. from a `Retry-After` header)
        retry_after: Option<Duration>,
    },

    /// The account's quota or entitlement is used up.
    #[error("quota exhausted: {message}")]
    QuotaExhausted { message: String },

    /// Credentials were rejected or could not be obtained.
    #[error("credentials rejected: {message}")]
    Credentials { message: String },

    /// The request never reached the remote, or the connection broke.
    #[error("transport failure: {message}")]
    Transport { message: String },

    /// A deadline elapsed before the remote answered.
    #[error("deadline exceeded: {message}")]
    DeadlineExceeded { message: String },

    #[error("{message}")]
    Other { message: String },
}

impl Fault {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn quota(message: impl Into<String>) -> Self {
        Self::QuotaExhausted { message: message.into() }
    }

    pub fn credentials(message: impl Into<String>) -> Self {
        Self::Credentials { message: message.into() }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into() }
    }

    pub fn deadline(message: impl Into<String>) -> Self {
        Self::DeadlineExceeded { message: message.into() }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other { message: message.into() }
    }

    /// Attach a server-suggested delay. Only API faults carry one; other
    /// variants are returned unchanged.
    #[must_use]
    pub fn with_retry_after(self, delay: Duration) -> Self {
        match self {
            Self::Api { status, message, .. } => Self::Api {
                status,
                message,
                retry_after: Some(delay),
            },
            other => other,
        }
    }

    /// Attach a raw `Retry-After` header value, ignoring it if unparseable.
    #[must_use]
    pub fn with_retry_after_header(self, header: &str) -> Self {
        match parse_retry_after(header) {
            Some(delay) => self.with_retry_after(delay),
            None => self,
        }
    }
}

/// Map a fault onto its semantic kind.
#[must_use]
pub fn classify(fault: &Fault) -> ErrorKind {
    match fault {
        Fault::Api { status, .. } => match status {
            401 => ErrorKind::Authentication,
            429 => ErrorKind::RateLimit,
            503 => ErrorKind::ServiceUnavailable,
            504 => ErrorKind::Timeout,
            _ => ErrorKind::ApiFault,
        },
        Fault::QuotaExhausted { .. } => ErrorKind::QuotaExceeded,
        Fault::Credentials { .. } => ErrorKind::Authentication,
        Fault::Transport { .. } => ErrorKind::Network,
        Fault::DeadlineExceeded { .. } => ErrorKind::Timeout,
        Fault::Other { .. } => ErrorKind::Unknown,
    }
}

/// Server-suggested delay carried by the fault, if any.
#[must_use]
pub fn extract_retry_after(fault: &Fault) -> Option<Duration> {
    match fault {
        Fault::Api { retry_after, .. } => *retry_after,
        _ => None,
    }
}

/// Parse a `Retry-After` value expressed in (possibly fractional) seconds.
#[must_use]
pub fn parse_retry_after(header: &str) -> Option<Duration> {
    let secs: f64 = header.trim().parse().ok()?;
    if secs < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(secs).ok()
}
