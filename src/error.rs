// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Errors returned to gateway callers.

use crate::batching::BatchError;
use crate::resilience::{CircuitError, ErrorKind, Fault, RetryError};

/// Why a gateway call did not produce a value.
///
/// `Clone` so a single group failure can be handed to every caller that
/// shared the batch.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    /// The service's circuit breaker is open; the operation was not invoked.
    #[error("circuit breaker open for service '{service}'")]
    BreakerOpen { service: String },

    /// Every attempt failed with a retryable kind.
    #[error("{service}.{operation} failed after {attempts} attempts ({kind}): {last}")]
    RetriesExhausted {
        service: String,
        operation: String,
        attempts: u32,
        kind: ErrorKind,
        last: Fault,
    },

    /// The operation failed with a kind that is never retried.
    #[error("{service}.{operation} failed ({kind}): {fault}")]
    Failed {
        service: String,
        operation: String,
        kind: ErrorKind,
        fault: Fault,
    },

    #[error(transparent)]
    Batch(#[from] BatchError),
}

impl GatewayError {
    /// Map the outcome of a protected retry loop onto a caller-facing error.
    pub fn from_retry(
        service: &str,
        operation: &str,
        err: RetryError<CircuitError<Fault>>,
    ) -> Self {
        match err {
            RetryError::Aborted(_)
            | RetryError::Exhausted { last: CircuitError::Rejected, .. }
            | RetryError::NotRetryable { error: CircuitError::Rejected, .. } => Self::BreakerOpen {
                service: service.to_string(),
            },
            RetryError::Exhausted {
                attempts,
                kind,
                last: CircuitError::Inner(last),
            } => Self::RetriesExhausted {
                service: service.to_string(),
                operation: operation.to_string(),
                attempts,
                kind,
                last,
            },
            RetryError::NotRetryable {
                kind,
                error: CircuitError::Inner(fault),
                ..
            } => Self::Failed {
                service: service.to_string(),
                operation: operation.to_string(),
                kind,
                fault,
            },
        }
    }

    /// Semantic kind of the last failure, if there was one.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::RetriesExhausted { kind, .. } | Self::Failed { kind, .. } => Some(*kind),
            Self::BreakerOpen { .. } | Self::Batch(_) => None,
        }
    }

    /// The fault raised by the last attempt, if the operation ran.
    #[must_use]
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            Self::RetriesExhausted { last, .. } => Some(last),
            Self::Failed { fault, .. } => Some(fault),
            Self::BreakerOpen { .. } | Self::Batch(_) => None,
        }
    }

    #[must_use]
    pub fn is_breaker_open(&self) -> bool {
        matches!(self, Self::BreakerOpen { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_maps_to_breaker_open() {
        let err = GatewayError::from_retry("vision", "describe", RetryError::Aborted(CircuitError::Rejected));
        assert_eq!(err, GatewayError::BreakerOpen { service: "vision".into() });
        assert!(err.is_breaker_open());
        assert_eq!(err.kind(), None);
    }

    #[test]
    fn test_exhaustion_keeps_last_fault() {
        let err = GatewayError::from_retry(
            "vision",
            "describe",
            RetryError::Exhausted {
                attempts: 3,
                kind: ErrorKind::Network,
                last: CircuitError::Inner(Fault::transport("reset")),
            },
        );

        assert_eq!(err.kind(), Some(ErrorKind::Network));
        assert_eq!(err.fault(), Some(&Fault::transport("reset")));
        assert!(err.to_string().contains("after 3 attempts"));
    }

    #[test]
    fn test_not_retryable_maps_to_failed() {
        let err = GatewayError::from_retry(
            "vision",
            "describe",
            RetryError::NotRetryable {
                attempt: 1,
                kind: ErrorKind::Authentication,
                error: CircuitError::Inner(Fault::api(401, "bad token")),
            },
        );

        assert!(matches!(
            err,
            GatewayError::Failed { kind: ErrorKind::Authentication, .. }
        ));
    }

    #[test]
    fn test_batch_errors_convert() {
        let err: GatewayError = BatchError::Abandoned.into();
        assert!(matches!(err, GatewayError::Batch(BatchError::Abandoned)));
    }
}
