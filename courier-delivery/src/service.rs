//! Service trait abstraction for queue introspection
//!
//! Decouples operational tooling (control sockets, admin surfaces) from the
//! concrete processor type: tooling talks to `QueueQueryService`, which the
//! processor implements, so the control path can be mocked in tests and
//! swapped in deployments.

use async_trait::async_trait;
use courier_core::{DeliveryId, EntryId, EntryStatus, QueueEntry};
use courier_store::{QueueStats, QueueStore, StatusFilter};

use crate::{error::DeliveryError, processor::DeliveryProcessor};

/// Query and control surface over the delivery queue
#[async_trait]
pub trait QueueQueryService: Send + Sync {
    /// Aggregate queue counters
    async fn queue_stats(&self) -> Result<QueueStats, DeliveryError>;

    /// Fetch one entry by id
    async fn get_entry(&self, id: EntryId) -> Result<Option<QueueEntry>, DeliveryError>;

    /// List entries with a given status
    async fn list_entries(
        &self,
        status: EntryStatus,
        filter: StatusFilter,
    ) -> Result<Vec<QueueEntry>, DeliveryError>;

    /// Cancel every pending entry of a delivery; returns the count
    async fn cancel_delivery(&self, delivery_id: DeliveryId) -> Result<usize, DeliveryError>;

    /// Number of worker tasks currently in flight
    fn in_flight(&self) -> usize;

    /// Stop claiming new entries
    fn pause(&self);

    /// Resume claiming entries
    fn resume(&self);
}

#[async_trait]
impl QueueQueryService for DeliveryProcessor {
    async fn queue_stats(&self) -> Result<QueueStats, DeliveryError> {
        self.queue_status().await
    }

    async fn get_entry(&self, id: EntryId) -> Result<Option<QueueEntry>, DeliveryError> {
        Ok(self.queue_store().find_by_id(id).await?)
    }

    async fn list_entries(
        &self,
        status: EntryStatus,
        filter: StatusFilter,
    ) -> Result<Vec<QueueEntry>, DeliveryError> {
        Ok(self.queue_store().find_by_status(status, filter).await?)
    }

    async fn cancel_delivery(&self, delivery_id: DeliveryId) -> Result<usize, DeliveryError> {
        Self::cancel_delivery(self, delivery_id).await
    }

    fn in_flight(&self) -> usize {
        Self::in_flight(self)
    }

    fn pause(&self) {
        Self::pause(self);
    }

    fn resume(&self) {
        Self::resume(self);
    }
}
