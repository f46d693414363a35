//! Narrow persistence ports
//!
//! The dequeue contract is the one correctness-critical operation: the
//! status flip pending → processing must happen atomically with selection,
//! so that two concurrent dequeuers can never observe the same entry.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::{
    DeliveryId, DeliveryLogRecord, Destination, DestinationHealth, DestinationId, DownloadLink,
    EntryId, EntryStatus, OrganizationId, QueueEntry, WebhookSecret,
};

use crate::error::Result;

/// Optional filters for status queries
#[derive(Debug, Clone, Default)]
pub struct StatusFilter {
    pub organization: Option<OrganizationId>,
    pub destination: Option<DestinationId>,
    pub limit: Option<usize>,
}

/// Aggregate queue counters, sampled in one shot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl QueueStats {
    /// Entries not yet terminal
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.pending + self.processing
    }

    /// All entries currently stored
    #[must_use]
    pub const fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.failed + self.cancelled
    }
}

/// Durable queue of per-destination work items
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Persist a new entry
    ///
    /// Enforces idempotency on (destination, idempotency key): a second
    /// enqueue for a known pair fails with
    /// [`StoreError::DuplicateIdempotencyKey`](crate::StoreError::DuplicateIdempotencyKey)
    /// carrying the original entry.
    async fn enqueue(&self, entry: QueueEntry) -> Result<QueueEntry>;

    /// Atomically claim up to `limit` due entries
    ///
    /// Selects entries with `status = pending`, `scheduled_at <= now`, and
    /// `next_retry_at` absent or elapsed, ordered by priority descending
    /// then `scheduled_at` ascending, and flips each to `processing` in the
    /// same critical section. A second concurrent dequeuer can never
    /// receive an entry returned by the first.
    async fn dequeue(&self, limit: usize) -> Result<Vec<QueueEntry>>;

    /// Transition an entry's status, validating the DAG
    async fn update_status(
        &self,
        id: EntryId,
        status: EntryStatus,
        processed_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Return a processing entry to pending with a retry schedule
    ///
    /// Idempotent on the same (entry, `retry_count`) pair.
    async fn schedule_retry(
        &self,
        id: EntryId,
        next_retry_at: DateTime<Utc>,
        retry_count: u32,
    ) -> Result<()>;

    /// Merge metadata keys into an entry (attempt history, last error,
    /// cross-system reference)
    async fn merge_metadata(
        &self,
        id: EntryId,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<()>;

    async fn find_by_id(&self, id: EntryId) -> Result<Option<QueueEntry>>;

    async fn find_by_delivery(&self, delivery_id: DeliveryId) -> Result<Vec<QueueEntry>>;

    async fn find_by_status(
        &self,
        status: EntryStatus,
        filter: StatusFilter,
    ) -> Result<Vec<QueueEntry>>;

    /// Cancel every pending entry of a delivery; returns how many were
    /// cancelled. Processing entries are left to complete.
    async fn cancel_by_delivery(&self, delivery_id: DeliveryId) -> Result<usize>;

    /// Delete terminal entries of `status` whose processed/updated time is
    /// older than `cutoff`; returns how many were removed
    async fn delete_terminal(&self, status: EntryStatus, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Reset entries stuck in `processing` since before `cutoff` back to
    /// `pending`, retry count unchanged; returns how many were reset
    async fn reset_stuck(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    async fn queue_stats(&self) -> Result<QueueStats>;

    /// The pending entry with the earliest `scheduled_at`
    async fn oldest_pending(&self) -> Result<Option<QueueEntry>>;

    /// Most recently processed terminal entries, newest first
    async fn recently_processed(&self, limit: usize) -> Result<Vec<QueueEntry>>;

    /// Non-terminal entry count per organisation
    async fn depth_by_organization(&self) -> Result<HashMap<OrganizationId, usize>>;
}

/// Destination records
#[async_trait]
pub trait DestinationStore: Send + Sync {
    async fn create(&self, destination: Destination) -> Result<Destination>;

    async fn get(&self, id: DestinationId) -> Result<Option<Destination>>;

    async fn update(&self, destination: Destination) -> Result<()>;

    async fn delete(&self, id: DestinationId) -> Result<()>;

    /// All enabled destinations owned by `organization`
    async fn list_enabled(&self, organization: &OrganizationId) -> Result<Vec<Destination>>;

    /// Bump the delivery usage counter
    async fn increment_usage(&self, id: DestinationId) -> Result<()>;
}

/// Destination health snapshots
#[async_trait]
pub trait HealthStore: Send + Sync {
    async fn upsert(&self, health: DestinationHealth) -> Result<()>;

    async fn get(&self, id: DestinationId) -> Result<Option<DestinationHealth>>;

    async fn list(&self) -> Result<Vec<DestinationHealth>>;
}

/// Append-only delivery log, indexed by delivery id
#[async_trait]
pub trait DeliveryLogStore: Send + Sync {
    /// Record (or replace) the log row for (delivery, destination)
    async fn record(&self, record: DeliveryLogRecord) -> Result<()>;

    async fn for_delivery(&self, delivery_id: DeliveryId) -> Result<Vec<DeliveryLogRecord>>;
}

/// Signed download-link records, consumed by the download handler
#[async_trait]
pub trait DownloadLinkStore: Send + Sync {
    async fn create_link(&self, link: DownloadLink) -> Result<()>;

    async fn get_link(&self, token: &str) -> Result<Option<DownloadLink>>;

    /// Bump the fetch counter of a link; missing tokens are ignored
    async fn record_download(&self, token: &str) -> Result<()>;

    async fn delete_link(&self, token: &str) -> Result<()>;

    /// Drop links that expired before `cutoff`; returns how many
    async fn delete_expired_links(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// Webhook signing secrets, one active record per destination
#[async_trait]
pub trait WebhookSecretStore: Send + Sync {
    /// Store (or replace) the secret record for a destination
    async fn put_secret(&self, secret: WebhookSecret) -> Result<()>;

    async fn get_secret(&self, destination: DestinationId) -> Result<Option<WebhookSecret>>;

    /// Rotate to `new_secret`, retaining the previous secret for
    /// verification of in-flight posts
    async fn rotate_secret(&self, destination: DestinationId, new_secret: String) -> Result<()>;

    async fn delete_secret(&self, destination: DestinationId) -> Result<()>;
}
