//! Queue entries
//!
//! A queue entry is the per-destination unit of work derived from a
//! delivery request. Its status walks a fixed DAG; `completed`, `failed`,
//! and `cancelled` are terminal.

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::{DeliveryId, DestinationId, EntryId, OrganizationId};

/// Default maximum number of retries for a queue entry
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Status of a queue entry
///
/// Transitions form a DAG:
///
/// ```text
/// pending --dequeue--> processing
/// processing --success--> completed            (terminal)
/// processing --retryable err--> pending        (next_retry_at set)
/// processing --exhausted / permanent--> failed (terminal)
/// pending --cancel--> cancelled                (terminal)
/// processing --stuck--> pending                (retry count unchanged)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl EntryStatus {
    /// Canonical lowercase name, as persisted
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether this status admits no further transitions
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the transition `self -> next` is a valid walk of the DAG
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing | Self::Cancelled)
                | (
                    Self::Processing,
                    Self::Completed | Self::Failed | Self::Pending
                )
        )
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dispatch priority, 0 through 10; higher dispatches first
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

/// Error returned when a priority is outside 0–10
#[derive(Debug, Error, PartialEq, Eq)]
#[error("priority {0} outside the allowed range 0-10")]
pub struct PriorityOutOfRange(pub i64);

impl Priority {
    pub const MIN: Self = Self(0);
    pub const MAX: Self = Self(10);

    /// Construct a priority, rejecting values outside 0–10
    pub fn new(value: u8) -> Result<Self, PriorityOutOfRange> {
        if value <= 10 {
            Ok(Self(value))
        } else {
            Err(PriorityOutOfRange(i64::from(value)))
        }
    }

    /// Validate a possibly-negative caller-supplied value
    pub const fn from_signed(value: i64) -> Result<Self, PriorityOutOfRange> {
        if value >= 0 && value <= 10 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            Ok(Self(value as u8))
        } else {
            Err(PriorityOutOfRange(value))
        }
    }

    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Priority {
    type Error = PriorityOutOfRange;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority.0
    }
}

/// The payload a queue entry carries to its handler
///
/// `data` is an opaque JSON document; the engine never inspects its
/// structure. `kind` is the caller-declared payload type tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryPayload {
    pub delivery_id: DeliveryId,
    pub kind: String,
    pub data: serde_json::Value,
    #[serde(default)]
    pub metadata: AHashMap<String, serde_json::Value>,
}

/// Record of one dispatch attempt, accumulated in entry metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    /// 1-indexed attempt number
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Error message if the attempt failed
    #[serde(default)]
    pub error: Option<String>,
    /// Protocol status code, when the handler reports one
    #[serde(default)]
    pub status_code: Option<u16>,
}

/// The per-destination unit of work derived from a delivery
///
/// Invariants: `retry_count <= max_retries` always; a pending entry with
/// `retry_count > 0` is a retry; terminal statuses never change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: EntryId,
    pub organization: OrganizationId,
    pub destination_id: DestinationId,
    pub priority: Priority,
    /// Earliest wall-clock time at which this entry may dispatch
    pub scheduled_at: DateTime<Utc>,
    /// Earliest retry time; dispatch waits for both this and `scheduled_at`
    #[serde(default)]
    pub next_retry_at: Option<DateTime<Utc>>,
    pub status: EntryStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub payload: DeliveryPayload,
    #[serde(default)]
    pub correlation_id: Option<String>,
    pub idempotency_key: String,
    /// Attempt history, last error, cross-system reference on success
    #[serde(default)]
    pub metadata: AHashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when the entry reaches a terminal status
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
}

impl QueueEntry {
    /// Create a new pending entry scheduled for immediate dispatch
    #[must_use]
    pub fn new(
        organization: OrganizationId,
        destination_id: DestinationId,
        priority: Priority,
        payload: DeliveryPayload,
        idempotency_key: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: EntryId::generate(),
            organization,
            destination_id,
            priority,
            scheduled_at: now,
            next_retry_at: None,
            status: EntryStatus::Pending,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            payload,
            correlation_id: None,
            idempotency_key,
            metadata: AHashMap::new(),
            created_at: now,
            updated_at: now,
            processed_at: None,
        }
    }

    /// Whether this entry is eligible for dispatch at `now`
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == EntryStatus::Pending
            && self.scheduled_at <= now
            && self.next_retry_at.is_none_or(|at| at <= now)
    }

    /// Whether any retry budget remains
    #[must_use]
    pub const fn retries_remaining(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// 1-indexed number of the attempt currently being made
    #[must_use]
    pub const fn attempt_number(&self) -> u32 {
        self.retry_count + 1
    }

    /// Append an attempt record to the entry metadata
    pub fn record_attempt(&mut self, attempt: &DeliveryAttempt) {
        let history = self
            .metadata
            .entry("attempts".to_string())
            .or_insert_with(|| serde_json::Value::Array(Vec::new()));
        if let Some(list) = history.as_array_mut()
            && let Ok(value) = serde_json::to_value(attempt)
        {
            list.push(value);
        }
        if let Some(error) = &attempt.error {
            self.metadata.insert(
                "last_error".to_string(),
                serde_json::Value::String(error.clone()),
            );
        }
        self.updated_at = Utc::now();
    }
}
