//! Typed error handling for delivery operations.
//!
//! This module provides structured error types that distinguish between:
//! - Permanent failures (bad credentials, bad config) - don't retry
//! - Transient failures (timeouts, resets, retryable HTTP codes) - retry
//!   with backoff
//! - Circuit refusals - requeued without counting against health
//! - Fatal internal errors - logged, entry failed, health untouched

use courier_core::entry::PriorityOutOfRange;
use thiserror::Error;

/// Abstract classification of a delivery error, used by the retry policy
/// and the health tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller-supplied input failed a contract; reported synchronously
    Validation,
    /// Credentials rejected by handler or store
    Auth,
    /// The resource is gone
    NotFound,
    /// Likely to succeed on retry
    Transient,
    /// The circuit breaker refused dispatch
    CircuitOpen,
    /// Internal invariant violation
    Fatal,
}

/// HTTP status codes outside `408`/`429` that are still worth retrying.
///
/// All 5xx codes are treated as server-side transients; remaining 4xx codes
/// are caller errors and permanent.
const fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429) || status >= 500
}

/// Error produced while dispatching one queue entry.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Destination configuration is malformed for its kind.
    #[error("invalid destination config: {0}")]
    InvalidConfig(String),

    /// The destination rejected our credentials.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The destination refused the operation for this principal.
    #[error("authorization denied: {0}")]
    AuthorizationDenied(String),

    /// The payload cannot be rendered for this destination kind.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The destination record is gone.
    #[error("destination not found: {0}")]
    DestinationNotFound(String),

    /// The destination answered with an HTTP error status.
    #[error("http status {status}: {message}")]
    Http { status: u16, message: String },

    /// The handler call exceeded its per-kind timeout.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Connection-level failure (refused, reset, broken pipe).
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Name resolution failed.
    #[error("dns lookup failed: {0}")]
    Dns(String),

    /// The circuit breaker refused dispatch for this destination.
    #[error("circuit open for destination")]
    CircuitOpen,

    /// A store operation failed mid-dispatch; scoped to the affected entry.
    #[error("store error: {0}")]
    Store(String),

    /// Internal invariant violation or unexpected panic payload.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DeliveryError {
    /// Classify this error for retry and health decisions.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfig(_) | Self::InvalidPayload(_) => ErrorKind::Validation,
            Self::AuthenticationFailed(_) | Self::AuthorizationDenied(_) => ErrorKind::Auth,
            Self::DestinationNotFound(_) => ErrorKind::NotFound,
            Self::Http { status, .. } => {
                if is_retryable_status(*status) {
                    ErrorKind::Transient
                } else {
                    ErrorKind::Validation
                }
            }
            Self::Timeout(_) | Self::ConnectionFailed(_) | Self::Dns(_) | Self::Store(_) => {
                ErrorKind::Transient
            }
            Self::CircuitOpen => ErrorKind::CircuitOpen,
            Self::Internal(_) => ErrorKind::Fatal,
        }
    }

    /// Whether the retry policy may reschedule this error.
    ///
    /// The denylist is fixed: invalid config, authentication,
    /// authorization, invalid payload, and missing destinations never
    /// retry. Fatal errors never retry. Circuit refusals are retryable at
    /// the scheduler level (with the recovery timeout as backoff).
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Transient | ErrorKind::CircuitOpen
        )
    }

    /// Whether this outcome counts against the destination's health.
    ///
    /// Circuit refusals never reached the destination, and fatal errors are
    /// ours, not the destination's.
    #[must_use]
    pub const fn counts_for_health(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Auth | ErrorKind::NotFound | ErrorKind::Transient | ErrorKind::Validation
        )
    }
}

impl From<courier_store::StoreError> for DeliveryError {
    fn from(error: courier_store::StoreError) -> Self {
        Self::Store(error.to_string())
    }
}

/// Request validation failures, surfaced synchronously by the coordinator.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("request has no organisation")]
    MissingOrganization,

    #[error("request has no destinations")]
    MissingDestinations,

    #[error("payload type is missing")]
    MissingPayloadType,

    #[error("payload data is missing")]
    MissingPayloadData,

    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error(transparent)]
    InvalidPriority(#[from] PriorityOutOfRange),

    #[error("request names {count} destinations, more than the {limit} allowed")]
    TooManyDestinations { count: usize, limit: usize },
}

/// Errors surfaced synchronously by the delivery coordinator.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Destination resolution produced an empty set.
    #[error("no deliverable destinations after resolution")]
    NoDestinations,

    #[error(transparent)]
    Scope(#[from] courier_core::ScopeError),

    #[error(transparent)]
    Store(#[from] courier_store::StoreError),
}
