//! Error types for store operations

use courier_core::{DestinationId, EntryId, EntryStatus, QueueEntry};
use thiserror::Error;

/// Top-level store error type
#[derive(Debug, Error)]
pub enum StoreError {
    /// Queue entry not found
    #[error("queue entry not found: {0}")]
    EntryNotFound(EntryId),

    /// Destination record not found
    #[error("destination not found: {0}")]
    DestinationNotFound(DestinationId),

    /// An entry already exists for this (destination, idempotency key) pair
    ///
    /// Carries the original entry so callers can surface the existing
    /// delivery instead of an error.
    #[error("duplicate idempotency key {key} for destination {destination}")]
    DuplicateIdempotencyKey {
        destination: DestinationId,
        key: String,
        existing: Box<QueueEntry>,
    },

    /// Status change that is not a valid walk of the entry DAG
    #[error("invalid status transition {from} -> {to} for entry {id}")]
    InvalidTransition {
        id: EntryId,
        from: EntryStatus,
        to: EntryStatus,
    },

    /// Store capacity exhausted
    #[error("store capacity exceeded: {occupied}/{capacity} entries")]
    CapacityExceeded { occupied: usize, capacity: usize },

    /// Backend-specific failure (connection loss, lock poisoning, ...)
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Specialized `Result` type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;
