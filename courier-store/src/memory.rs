//! In-memory store implementation
//!
//! Backs every port with maps behind a single mutex. Holding one lock for
//! the whole queue makes the dequeue selection and the pending → processing
//! flip a single critical section, which is the atomicity the
//! [`QueueStore::dequeue`] contract requires. Intended for tests and
//! single-process deployments; production substitutes a database-backed
//! implementation with row-level locking.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::{
    DeliveryId, DeliveryLogRecord, Destination, DestinationHealth, DestinationId, DownloadLink,
    EntryId, EntryStatus, OrganizationId, QueueEntry, WebhookSecret,
};
use parking_lot::Mutex;

use crate::{
    error::{Result, StoreError},
    ports::{
        DeliveryLogStore, DestinationStore, DownloadLinkStore, HealthStore, QueueStats,
        QueueStore, StatusFilter, WebhookSecretStore,
    },
};

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<EntryId, QueueEntry>,
    /// (destination, idempotency key) -> entry, for duplicate rejection
    idempotency: HashMap<(DestinationId, String), EntryId>,
    destinations: HashMap<DestinationId, Destination>,
    health: HashMap<DestinationId, DestinationHealth>,
    delivery_log: HashMap<(DeliveryId, DestinationId), DeliveryLogRecord>,
    download_links: HashMap<String, DownloadLink>,
    webhook_secrets: HashMap<DestinationId, WebhookSecret>,
}

/// In-memory implementation of every store port
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    /// Maximum number of queue entries (None = unlimited)
    capacity: Option<usize>,
}

impl MemoryStore {
    /// Create a new empty store with unlimited capacity
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with a queue-entry capacity limit
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity: Some(capacity),
        }
    }

    /// Number of queue entries currently stored
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn terminal_timestamp(entry: &QueueEntry) -> DateTime<Utc> {
    entry.processed_at.unwrap_or(entry.updated_at)
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn enqueue(&self, entry: QueueEntry) -> Result<QueueEntry> {
        let mut inner = self.inner.lock();

        let key = (entry.destination_id, entry.idempotency_key.clone());
        if let Some(existing_id) = inner.idempotency.get(&key)
            && let Some(existing) = inner.entries.get(existing_id)
        {
            return Err(StoreError::DuplicateIdempotencyKey {
                destination: entry.destination_id,
                key: entry.idempotency_key,
                existing: Box::new(existing.clone()),
            });
        }

        if let Some(capacity) = self.capacity
            && inner.entries.len() >= capacity
        {
            return Err(StoreError::CapacityExceeded {
                occupied: inner.entries.len(),
                capacity,
            });
        }

        inner.idempotency.insert(key, entry.id);
        inner.entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn dequeue(&self, limit: usize) -> Result<Vec<QueueEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let mut inner = self.inner.lock();

        let mut due: Vec<EntryId> = inner
            .entries
            .values()
            .filter(|entry| entry.is_due(now))
            .map(|entry| entry.id)
            .collect();

        // Priority descending, scheduled-at ascending
        due.sort_by(|a, b| {
            let left = &inner.entries[a];
            let right = &inner.entries[b];
            right
                .priority
                .cmp(&left.priority)
                .then(left.scheduled_at.cmp(&right.scheduled_at))
        });
        due.truncate(limit);

        let mut claimed = Vec::with_capacity(due.len());
        for id in due {
            if let Some(entry) = inner.entries.get_mut(&id) {
                entry.status = EntryStatus::Processing;
                entry.updated_at = now;
                claimed.push(entry.clone());
            }
        }

        Ok(claimed)
    }

    async fn update_status(
        &self,
        id: EntryId,
        status: EntryStatus,
        processed_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        let entry = inner
            .entries
            .get_mut(&id)
            .ok_or(StoreError::EntryNotFound(id))?;

        if !entry.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                id,
                from: entry.status,
                to: status,
            });
        }

        entry.status = status;
        entry.updated_at = Utc::now();
        if let Some(at) = processed_at {
            entry.processed_at = Some(at);
        }
        Ok(())
    }

    async fn schedule_retry(
        &self,
        id: EntryId,
        next_retry_at: DateTime<Utc>,
        retry_count: u32,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        let entry = inner
            .entries
            .get_mut(&id)
            .ok_or(StoreError::EntryNotFound(id))?;

        if !entry.status.can_transition_to(EntryStatus::Pending) {
            return Err(StoreError::InvalidTransition {
                id,
                from: entry.status,
                to: EntryStatus::Pending,
            });
        }

        entry.status = EntryStatus::Pending;
        entry.next_retry_at = Some(next_retry_at);
        entry.retry_count = retry_count.min(entry.max_retries);
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn merge_metadata(
        &self,
        id: EntryId,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        let entry = inner
            .entries
            .get_mut(&id)
            .ok_or(StoreError::EntryNotFound(id))?;
        for (key, value) in metadata {
            entry.metadata.insert(key, value);
        }
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn find_by_id(&self, id: EntryId) -> Result<Option<QueueEntry>> {
        Ok(self.inner.lock().entries.get(&id).cloned())
    }

    async fn find_by_delivery(&self, delivery_id: DeliveryId) -> Result<Vec<QueueEntry>> {
        Ok(self
            .inner
            .lock()
            .entries
            .values()
            .filter(|entry| entry.payload.delivery_id == delivery_id)
            .cloned()
            .collect())
    }

    async fn find_by_status(
        &self,
        status: EntryStatus,
        filter: StatusFilter,
    ) -> Result<Vec<QueueEntry>> {
        let inner = self.inner.lock();
        let mut matched: Vec<QueueEntry> = inner
            .entries
            .values()
            .filter(|entry| entry.status == status)
            .filter(|entry| {
                filter
                    .organization
                    .as_ref()
                    .is_none_or(|org| &entry.organization == org)
            })
            .filter(|entry| {
                filter
                    .destination
                    .is_none_or(|id| entry.destination_id == id)
            })
            .cloned()
            .collect();
        matched.sort_by_key(|entry| entry.created_at);
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn cancel_by_delivery(&self, delivery_id: DeliveryId) -> Result<usize> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let mut cancelled = 0;
        for entry in inner.entries.values_mut() {
            if entry.payload.delivery_id == delivery_id && entry.status == EntryStatus::Pending {
                entry.status = EntryStatus::Cancelled;
                entry.updated_at = now;
                entry.processed_at = Some(now);
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    async fn delete_terminal(&self, status: EntryStatus, cutoff: DateTime<Utc>) -> Result<usize> {
        if !status.is_terminal() {
            return Ok(0);
        }
        let mut inner = self.inner.lock();
        let doomed: Vec<EntryId> = inner
            .entries
            .values()
            .filter(|entry| entry.status == status && terminal_timestamp(entry) < cutoff)
            .map(|entry| entry.id)
            .collect();
        for id in &doomed {
            if let Some(entry) = inner.entries.remove(id) {
                inner
                    .idempotency
                    .remove(&(entry.destination_id, entry.idempotency_key));
            }
        }
        Ok(doomed.len())
    }

    async fn reset_stuck(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let mut reset = 0;
        for entry in inner.entries.values_mut() {
            if entry.status == EntryStatus::Processing && entry.updated_at < cutoff {
                entry.status = EntryStatus::Pending;
                entry.updated_at = now;
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let inner = self.inner.lock();
        let mut stats = QueueStats::default();
        for entry in inner.entries.values() {
            match entry.status {
                EntryStatus::Pending => stats.pending += 1,
                EntryStatus::Processing => stats.processing += 1,
                EntryStatus::Completed => stats.completed += 1,
                EntryStatus::Failed => stats.failed += 1,
                EntryStatus::Cancelled => stats.cancelled += 1,
            }
        }
        Ok(stats)
    }

    async fn oldest_pending(&self) -> Result<Option<QueueEntry>> {
        Ok(self
            .inner
            .lock()
            .entries
            .values()
            .filter(|entry| entry.status == EntryStatus::Pending)
            .min_by_key(|entry| entry.scheduled_at)
            .cloned())
    }

    async fn recently_processed(&self, limit: usize) -> Result<Vec<QueueEntry>> {
        let inner = self.inner.lock();
        let mut terminal: Vec<QueueEntry> = inner
            .entries
            .values()
            .filter(|entry| entry.status.is_terminal())
            .cloned()
            .collect();
        terminal.sort_by_key(|entry| std::cmp::Reverse(terminal_timestamp(entry)));
        terminal.truncate(limit);
        Ok(terminal)
    }

    async fn depth_by_organization(&self) -> Result<HashMap<OrganizationId, usize>> {
        let inner = self.inner.lock();
        let mut depths: HashMap<OrganizationId, usize> = HashMap::new();
        for entry in inner.entries.values() {
            if !entry.status.is_terminal() {
                *depths.entry(entry.organization.clone()).or_default() += 1;
            }
        }
        Ok(depths)
    }
}

#[async_trait]
impl DestinationStore for MemoryStore {
    async fn create(&self, destination: Destination) -> Result<Destination> {
        self.inner
            .lock()
            .destinations
            .insert(destination.id, destination.clone());
        Ok(destination)
    }

    async fn get(&self, id: DestinationId) -> Result<Option<Destination>> {
        Ok(self.inner.lock().destinations.get(&id).cloned())
    }

    async fn update(&self, destination: Destination) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.destinations.contains_key(&destination.id) {
            return Err(StoreError::DestinationNotFound(destination.id));
        }
        inner.destinations.insert(destination.id, destination);
        Ok(())
    }

    async fn delete(&self, id: DestinationId) -> Result<()> {
        self.inner
            .lock()
            .destinations
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::DestinationNotFound(id))
    }

    async fn list_enabled(&self, organization: &OrganizationId) -> Result<Vec<Destination>> {
        let inner = self.inner.lock();
        let mut enabled: Vec<Destination> = inner
            .destinations
            .values()
            .filter(|destination| {
                &destination.organization == organization && destination.is_enabled()
            })
            .cloned()
            .collect();
        enabled.sort_by_key(|destination| destination.id);
        Ok(enabled)
    }

    async fn increment_usage(&self, id: DestinationId) -> Result<()> {
        let mut inner = self.inner.lock();
        let destination = inner
            .destinations
            .get_mut(&id)
            .ok_or(StoreError::DestinationNotFound(id))?;
        destination.usage_count += 1;
        destination.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl HealthStore for MemoryStore {
    async fn upsert(&self, health: DestinationHealth) -> Result<()> {
        self.inner
            .lock()
            .health
            .insert(health.destination_id, health);
        Ok(())
    }

    async fn get(&self, id: DestinationId) -> Result<Option<DestinationHealth>> {
        Ok(self.inner.lock().health.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<DestinationHealth>> {
        Ok(self.inner.lock().health.values().cloned().collect())
    }
}

#[async_trait]
impl DeliveryLogStore for MemoryStore {
    async fn record(&self, record: DeliveryLogRecord) -> Result<()> {
        self.inner
            .lock()
            .delivery_log
            .insert((record.delivery_id, record.destination_id), record);
        Ok(())
    }

    async fn for_delivery(&self, delivery_id: DeliveryId) -> Result<Vec<DeliveryLogRecord>> {
        Ok(self
            .inner
            .lock()
            .delivery_log
            .values()
            .filter(|record| record.delivery_id == delivery_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DownloadLinkStore for MemoryStore {
    async fn create_link(&self, link: DownloadLink) -> Result<()> {
        self.inner
            .lock()
            .download_links
            .insert(link.token.clone(), link);
        Ok(())
    }

    async fn get_link(&self, token: &str) -> Result<Option<DownloadLink>> {
        Ok(self.inner.lock().download_links.get(token).cloned())
    }

    async fn record_download(&self, token: &str) -> Result<()> {
        if let Some(link) = self.inner.lock().download_links.get_mut(token) {
            link.download_count += 1;
        }
        Ok(())
    }

    async fn delete_link(&self, token: &str) -> Result<()> {
        self.inner.lock().download_links.remove(token);
        Ok(())
    }

    async fn delete_expired_links(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut inner = self.inner.lock();
        let before = inner.download_links.len();
        inner.download_links.retain(|_, link| link.expires_at >= cutoff);
        Ok(before - inner.download_links.len())
    }
}

#[async_trait]
impl WebhookSecretStore for MemoryStore {
    async fn put_secret(&self, secret: WebhookSecret) -> Result<()> {
        self.inner
            .lock()
            .webhook_secrets
            .insert(secret.destination_id, secret);
        Ok(())
    }

    async fn get_secret(&self, destination: DestinationId) -> Result<Option<WebhookSecret>> {
        Ok(self.inner.lock().webhook_secrets.get(&destination).cloned())
    }

    async fn rotate_secret(&self, destination: DestinationId, new_secret: String) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.webhook_secrets.get_mut(&destination) {
            Some(secret) => {
                secret.rotate(new_secret);
                Ok(())
            }
            None => {
                inner
                    .webhook_secrets
                    .insert(destination, WebhookSecret::new(destination, new_secret));
                Ok(())
            }
        }
    }

    async fn delete_secret(&self, destination: DestinationId) -> Result<()> {
        self.inner.lock().webhook_secrets.remove(&destination);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ahash::AHashMap;
    use courier_core::{DeliveryPayload, Priority};

    use super::*;

    fn entry_with(priority: u8, destination: DestinationId, key: &str) -> QueueEntry {
        QueueEntry::new(
            OrganizationId::new("org-a"),
            destination,
            Priority::new(priority).unwrap(),
            DeliveryPayload {
                delivery_id: DeliveryId::generate(),
                kind: "report".to_string(),
                data: serde_json::json!({"n": 1}),
                metadata: AHashMap::new(),
            },
            key.to_string(),
        )
    }

    #[tokio::test]
    async fn test_enqueue_dequeue_flips_status() {
        let store = MemoryStore::new();
        let destination = DestinationId::generate();
        store
            .enqueue(entry_with(5, destination, "k1"))
            .await
            .unwrap();

        let claimed = store.dequeue(10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status, EntryStatus::Processing);

        // Claimed entries are invisible to a second dequeue
        assert!(store.dequeue(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dequeue_orders_by_priority_then_schedule() {
        let store = MemoryStore::new();
        let destination = DestinationId::generate();

        let mut low = entry_with(1, destination, "low");
        let mut high = entry_with(9, destination, "high");
        let mut mid_early = entry_with(5, destination, "mid-early");
        let mut mid_late = entry_with(5, destination, "mid-late");

        let base = Utc::now() - chrono::Duration::seconds(60);
        low.scheduled_at = base;
        high.scheduled_at = base + chrono::Duration::seconds(30);
        mid_early.scheduled_at = base + chrono::Duration::seconds(1);
        mid_late.scheduled_at = base + chrono::Duration::seconds(20);

        for entry in [low, high, mid_early, mid_late] {
            store.enqueue(entry).await.unwrap();
        }

        let claimed = store.dequeue(4).await.unwrap();
        let keys: Vec<&str> = claimed
            .iter()
            .map(|entry| entry.idempotency_key.as_str())
            .collect();
        assert_eq!(keys, vec!["high", "mid-early", "mid-late", "low"]);
    }

    #[tokio::test]
    async fn test_duplicate_idempotency_key_rejected_with_original() {
        let store = MemoryStore::new();
        let destination = DestinationId::generate();
        let original = store
            .enqueue(entry_with(5, destination, "same"))
            .await
            .unwrap();

        let err = store
            .enqueue(entry_with(3, destination, "same"))
            .await
            .expect_err("duplicate must be rejected");
        match err {
            StoreError::DuplicateIdempotencyKey { existing, .. } => {
                assert_eq!(existing.id, original.id);
            }
            other => panic!("unexpected error: {other}"),
        }

        // Store state is unchanged by the rejected enqueue
        assert_eq!(store.len(), 1);

        // Same key on a different destination is a different pair
        store
            .enqueue(entry_with(5, DestinationId::generate(), "same"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_invalid_transition_rejected() {
        let store = MemoryStore::new();
        let entry = store
            .enqueue(entry_with(5, DestinationId::generate(), "k"))
            .await
            .unwrap();

        // pending -> completed skips processing
        let err = store
            .update_status(entry.id, EntryStatus::Completed, None)
            .await
            .expect_err("invalid transition");
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        // Terminal statuses are frozen
        store.dequeue(1).await.unwrap();
        store
            .update_status(entry.id, EntryStatus::Completed, Some(Utc::now()))
            .await
            .unwrap();
        assert!(
            store
                .update_status(entry.id, EntryStatus::Pending, None)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_schedule_retry_defers_entry() {
        let store = MemoryStore::new();
        let entry = store
            .enqueue(entry_with(5, DestinationId::generate(), "k"))
            .await
            .unwrap();
        store.dequeue(1).await.unwrap();

        store
            .schedule_retry(entry.id, Utc::now() + chrono::Duration::seconds(60), 1)
            .await
            .unwrap();

        let stored = store.find_by_id(entry.id).await.unwrap().unwrap();
        assert_eq!(stored.status, EntryStatus::Pending);
        assert_eq!(stored.retry_count, 1);

        // Not yet due, so dequeue skips it
        assert!(store.dequeue(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_schedule_retry_idempotent_on_retry_count() {
        let store = MemoryStore::new();
        let entry = store
            .enqueue(entry_with(5, DestinationId::generate(), "k"))
            .await
            .unwrap();
        store.dequeue(1).await.unwrap();

        let at = Utc::now() + chrono::Duration::seconds(60);
        store.schedule_retry(entry.id, at, 2).await.unwrap();
        store.schedule_retry(entry.id, at, 2).await.unwrap();

        let stored = store.find_by_id(entry.id).await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 2);
        assert_eq!(stored.status, EntryStatus::Pending);

        // The retry count never exceeds the entry's budget
        store
            .schedule_retry(entry.id, at, stored.max_retries + 10)
            .await
            .unwrap();
        let stored = store.find_by_id(entry.id).await.unwrap().unwrap();
        assert_eq!(stored.retry_count, stored.max_retries);
    }

    #[tokio::test]
    async fn test_cancel_leaves_processing_untouched() {
        let store = MemoryStore::new();
        let destination = DestinationId::generate();
        let delivery_id = DeliveryId::generate();

        let mut first = entry_with(5, destination, "a");
        first.payload.delivery_id = delivery_id;
        let mut second = entry_with(4, destination, "b");
        second.payload.delivery_id = delivery_id;

        let first = store.enqueue(first).await.unwrap();
        let second = store.enqueue(second).await.unwrap();

        // Claim the first; the second remains pending
        let claimed = store.dequeue(1).await.unwrap();
        assert_eq!(claimed[0].id, first.id);

        let cancelled = store.cancel_by_delivery(delivery_id).await.unwrap();
        assert_eq!(cancelled, 1);

        assert_eq!(
            store.find_by_id(first.id).await.unwrap().unwrap().status,
            EntryStatus::Processing
        );
        assert_eq!(
            store.find_by_id(second.id).await.unwrap().unwrap().status,
            EntryStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_reset_stuck_preserves_retry_count() {
        let store = MemoryStore::new();
        let entry = store
            .enqueue(entry_with(5, DestinationId::generate(), "k"))
            .await
            .unwrap();
        store.dequeue(1).await.unwrap();

        // Everything updated before a future cutoff counts as stuck
        let reset = store
            .reset_stuck(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(reset, 1);

        let stored = store.find_by_id(entry.id).await.unwrap().unwrap();
        assert_eq!(stored.status, EntryStatus::Pending);
        assert_eq!(stored.retry_count, 0);
    }

    #[tokio::test]
    async fn test_delete_terminal_honours_cutoff() {
        let store = MemoryStore::new();
        let entry = store
            .enqueue(entry_with(5, DestinationId::generate(), "k"))
            .await
            .unwrap();
        store.dequeue(1).await.unwrap();
        store
            .update_status(entry.id, EntryStatus::Completed, Some(Utc::now()))
            .await
            .unwrap();

        // Cutoff in the past removes nothing
        let removed = store
            .delete_terminal(
                EntryStatus::Completed,
                Utc::now() - chrono::Duration::hours(1),
            )
            .await
            .unwrap();
        assert_eq!(removed, 0);

        let removed = store
            .delete_terminal(
                EntryStatus::Completed,
                Utc::now() + chrono::Duration::seconds(1),
            )
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let store = MemoryStore::with_capacity(1);
        let destination = DestinationId::generate();
        store
            .enqueue(entry_with(5, destination, "a"))
            .await
            .unwrap();

        let err = store
            .enqueue(entry_with(5, destination, "b"))
            .await
            .expect_err("over capacity");
        assert!(matches!(err, StoreError::CapacityExceeded { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_dequeuers_never_share_an_entry() {
        let store = Arc::new(MemoryStore::new());
        let destination = DestinationId::generate();
        for i in 0..50 {
            store
                .enqueue(entry_with(5, destination, &format!("k{i}")))
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut claimed = Vec::new();
                loop {
                    let batch = store.dequeue(5).await.unwrap();
                    if batch.is_empty() {
                        break;
                    }
                    claimed.extend(batch.into_iter().map(|entry| entry.id));
                }
                claimed
            }));
        }

        let mut seen = std::collections::HashSet::new();
        let mut total = 0;
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(seen.insert(id), "entry {id} claimed twice");
                total += 1;
            }
        }
        assert_eq!(total, 50);
    }

    #[tokio::test]
    async fn test_download_link_lifecycle() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let link = courier_core::DownloadLink {
            token: "tok-1".to_string(),
            organization: OrganizationId::new("org-a"),
            destination_id: DestinationId::generate(),
            delivery_id: DeliveryId::generate(),
            expires_at: now + chrono::Duration::hours(1),
            created_at: now,
            download_count: 0,
        };

        store.create_link(link).await.unwrap();
        store.record_download("tok-1").await.unwrap();
        store.record_download("tok-1").await.unwrap();
        let stored = store.get_link("tok-1").await.unwrap().unwrap();
        assert_eq!(stored.download_count, 2);

        // Not yet expired
        assert_eq!(store.delete_expired_links(now).await.unwrap(), 0);
        assert_eq!(
            store
                .delete_expired_links(now + chrono::Duration::hours(2))
                .await
                .unwrap(),
            1
        );
        assert!(store.get_link("tok-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_webhook_secret_rotation() {
        let store = MemoryStore::new();
        let destination = DestinationId::generate();

        // Rotating an unknown destination creates the record
        store
            .rotate_secret(destination, "first".to_string())
            .await
            .unwrap();
        let secret = store.get_secret(destination).await.unwrap().unwrap();
        assert!(secret.verifies("first"));

        store
            .rotate_secret(destination, "second".to_string())
            .await
            .unwrap();
        let secret = store.get_secret(destination).await.unwrap().unwrap();
        assert!(secret.verifies("second"));
        assert!(secret.verifies("first"), "previous secret retained");

        store.delete_secret(destination).await.unwrap();
        assert!(store.get_secret(destination).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_depth_by_organization() {
        let store = MemoryStore::new();
        let destination = DestinationId::generate();

        let mut foreign = entry_with(5, destination, "x");
        foreign.organization = OrganizationId::new("org-b");
        store.enqueue(foreign).await.unwrap();
        store
            .enqueue(entry_with(5, destination, "y"))
            .await
            .unwrap();
        store
            .enqueue(entry_with(5, destination, "z"))
            .await
            .unwrap();

        let depths = store.depth_by_organization().await.unwrap();
        assert_eq!(depths[&OrganizationId::new("org-a")], 2);
        assert_eq!(depths[&OrganizationId::new("org-b")], 1);
    }
}
