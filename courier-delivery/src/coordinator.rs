//! Delivery coordinator
//!
//! The public entry point of the engine: validates a delivery request,
//! resolves its destinations, fans out one queue entry per deliverable
//! destination, and answers status queries. Runtime delivery errors are
//! never raised here; they surface only through status queries.

use std::sync::Arc;

use chrono::Utc;
use courier_core::{
    DeliveryId, DeliveryLogRecord, DeliveryLogStatus, DeliveryPayload, Destination,
    DestinationDeliveryStatus, DestinationId, EntryStatus, OrgContext, Priority, QueueEntry,
};
use courier_store::{DeliveryLogStore, DestinationStore, QueueStore, StoreError};
use serde::Deserialize;

use crate::{
    error::{CoordinatorError, ValidationError},
    health::HealthTracker,
    types::{
        AcceptStatus, DeliveryRequest, DeliveryResponse, DeliveryStatusView, DestinationAccept,
        DestinationSelector, DestinationStatusView,
    },
};

const fn default_max_payload_bytes() -> usize {
    10 * 1024 * 1024 // 10 MiB
}

const fn default_max_destinations() -> usize {
    50
}

const fn default_max_retries() -> u32 {
    courier_core::entry::DEFAULT_MAX_RETRIES
}

const fn default_priority() -> u8 {
    5
}

/// Configuration for the delivery coordinator
#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorConfig {
    /// Largest accepted serialized payload, in bytes
    ///
    /// Default: 10 MiB
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,

    /// Most destinations a single request may name
    ///
    /// Default: 50
    #[serde(default = "default_max_destinations")]
    pub max_destinations: usize,

    /// Retry budget stamped onto new queue entries
    ///
    /// The single retry-count knob: the budget travels with each entry and
    /// the scheduler consults it on every failure. Backoff timing lives in
    /// the processor's retry policy.
    ///
    /// Default: 5
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Priority used when a request does not specify one
    ///
    /// Must be within 0-10; requests that fall back to an out-of-range
    /// value are rejected with a validation error.
    ///
    /// Default: 5
    #[serde(default = "default_priority")]
    pub default_priority: u8,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: default_max_payload_bytes(),
            max_destinations: default_max_destinations(),
            max_retries: default_max_retries(),
            default_priority: default_priority(),
        }
    }
}

/// Public entry point for delivery submission and status queries
pub struct DeliveryCoordinator {
    config: CoordinatorConfig,
    queue: Arc<dyn QueueStore>,
    destinations: Arc<dyn DestinationStore>,
    delivery_log: Arc<dyn DeliveryLogStore>,
    health: Arc<HealthTracker>,
}

impl std::fmt::Debug for DeliveryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryCoordinator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DeliveryCoordinator {
    #[must_use]
    pub fn new(
        config: CoordinatorConfig,
        queue: Arc<dyn QueueStore>,
        destinations: Arc<dyn DestinationStore>,
        delivery_log: Arc<dyn DeliveryLogStore>,
        health: Arc<HealthTracker>,
    ) -> Self {
        Self {
            config,
            queue,
            destinations,
            delivery_log,
            health,
        }
    }

    /// Accept a delivery request and fan it out to queue entries
    ///
    /// # Errors
    /// Returns [`CoordinatorError::Validation`] for contract violations,
    /// [`CoordinatorError::NoDestinations`] when resolution yields nothing
    /// deliverable, and [`CoordinatorError::Scope`] for cross-organisation
    /// requests. A duplicate idempotency key is not an error; the existing
    /// delivery is surfaced in the per-destination status.
    pub async fn submit(
        &self,
        ctx: &OrgContext,
        request: DeliveryRequest,
    ) -> Result<DeliveryResponse, CoordinatorError> {
        ctx.ensure_owns(&request.organization)?;
        let priority = self.validate(&request)?;

        let (resolved, mut accepts) = self.resolve(&request).await?;
        if resolved.is_empty() {
            // Log the drops before failing so operators can see why
            for accept in &accepts {
                if let AcceptStatus::Dropped { reason } = &accept.status {
                    tracing::warn!(
                        destination = %accept.destination_id,
                        reason = %reason,
                        "Destination dropped during resolution"
                    );
                }
            }
            return Err(CoordinatorError::NoDestinations);
        }

        let delivery_id = DeliveryId::generate();
        let mut queued = 0usize;
        let mut duplicates: Vec<DeliveryId> = Vec::new();

        for destination in &resolved {
            if !self.health.permit(destination.id) {
                tracing::warn!(
                    destination = %destination.id,
                    "Destination not dispatchable, dropping from delivery"
                );
                accepts.push(DestinationAccept {
                    destination_id: destination.id,
                    status: AcceptStatus::Dropped {
                        reason: "destination health does not permit dispatch".to_string(),
                    },
                });
                continue;
            }

            let entry = self.build_entry(&request, destination, delivery_id, priority);
            match self.queue.enqueue(entry).await {
                Ok(_) => {
                    queued += 1;
                    accepts.push(DestinationAccept {
                        destination_id: destination.id,
                        status: AcceptStatus::Queued,
                    });

                    if let Err(error) = self.destinations.increment_usage(destination.id).await {
                        tracing::warn!(
                            destination = %destination.id,
                            error = %error,
                            "Failed to increment destination usage"
                        );
                    }

                    let log = DeliveryLogRecord {
                        delivery_id,
                        organization: request.organization.clone(),
                        destination_id: destination.id,
                        status: DestinationDeliveryStatus::Pending,
                        attempts: 0,
                        cross_system_reference: None,
                        failure_reason: None,
                        recorded_at: Utc::now(),
                    };
                    if let Err(error) = self.delivery_log.record(log).await {
                        tracing::warn!(
                            delivery_id = %delivery_id,
                            error = %error,
                            "Failed to write initial delivery log row"
                        );
                    }
                }
                Err(StoreError::DuplicateIdempotencyKey { existing, .. }) => {
                    let original = existing.payload.delivery_id;
                    tracing::info!(
                        destination = %destination.id,
                        delivery_id = %original,
                        "Duplicate idempotency key, returning existing delivery"
                    );
                    duplicates.push(original);
                    accepts.push(DestinationAccept {
                        destination_id: destination.id,
                        status: AcceptStatus::Duplicate {
                            delivery_id: original,
                        },
                    });
                }
                Err(error) => return Err(error.into()),
            }
        }

        if let Some(metrics) = courier_metrics::metrics() {
            let size = serde_json::to_vec(&request.payload.data)
                .map(|bytes| bytes.len() as u64)
                .unwrap_or(0);
            metrics.delivery.record_payload_size(size);
        }

        // A request that deduplicated entirely against one earlier delivery
        // is answered with that delivery's id
        let (delivery_id, status) = if queued > 0 {
            (delivery_id, DeliveryLogStatus::Queued)
        } else if let [original] = duplicates.as_slice() {
            (*original, DeliveryLogStatus::Queued)
        } else if duplicates.is_empty() {
            (delivery_id, DeliveryLogStatus::Failed)
        } else {
            (delivery_id, DeliveryLogStatus::Queued)
        };

        Ok(DeliveryResponse {
            delivery_id,
            status,
            destinations: accepts,
        })
    }

    /// Current status of a delivery, per destination
    ///
    /// # Errors
    /// Returns [`CoordinatorError::Scope`] when the delivery belongs to a
    /// different organisation.
    pub async fn delivery_status(
        &self,
        ctx: &OrgContext,
        delivery_id: DeliveryId,
    ) -> Result<DeliveryStatusView, CoordinatorError> {
        let entries = self.queue.find_by_delivery(delivery_id).await?;
        for entry in &entries {
            ctx.ensure_owns(&entry.organization)?;
        }
        let log = self.delivery_log.for_delivery(delivery_id).await?;
        for record in &log {
            ctx.ensure_owns(&record.organization)?;
        }

        let mut destinations = Vec::with_capacity(entries.len());
        for entry in &entries {
            let record = log
                .iter()
                .find(|record| record.destination_id == entry.destination_id);

            let status = match entry.status {
                EntryStatus::Completed => DestinationDeliveryStatus::Delivered,
                EntryStatus::Failed | EntryStatus::Cancelled => DestinationDeliveryStatus::Failed,
                EntryStatus::Pending if entry.retry_count > 0 => {
                    DestinationDeliveryStatus::Retrying
                }
                EntryStatus::Pending | EntryStatus::Processing => {
                    DestinationDeliveryStatus::Pending
                }
            };

            destinations.push(DestinationStatusView {
                destination_id: entry.destination_id,
                status,
                attempts: record.map_or(entry.retry_count, |record| record.attempts),
                cross_system_reference: record
                    .and_then(|record| record.cross_system_reference.clone()),
                failure_reason: if entry.status == EntryStatus::Cancelled {
                    Some("cancelled".to_string())
                } else {
                    record.and_then(|record| record.failure_reason.clone())
                },
            });
        }

        Ok(DeliveryStatusView {
            delivery_id,
            status: aggregate(&destinations),
            destinations,
        })
    }

    fn validate(&self, request: &DeliveryRequest) -> Result<Priority, ValidationError> {
        if request.organization.as_str().is_empty() {
            return Err(ValidationError::MissingOrganization);
        }
        if request.payload.kind.is_empty() {
            return Err(ValidationError::MissingPayloadType);
        }
        if request.payload.data.is_null() {
            return Err(ValidationError::MissingPayloadData);
        }

        let size = serde_json::to_vec(&request.payload.data)
            .map(|bytes| bytes.len())
            .unwrap_or(usize::MAX);
        if size > self.config.max_payload_bytes {
            return Err(ValidationError::PayloadTooLarge {
                size,
                limit: self.config.max_payload_bytes,
            });
        }

        if let DestinationSelector::Explicit(ids) = &request.destinations {
            if ids.is_empty() {
                return Err(ValidationError::MissingDestinations);
            }
            if ids.len() > self.config.max_destinations {
                return Err(ValidationError::TooManyDestinations {
                    count: ids.len(),
                    limit: self.config.max_destinations,
                });
            }
        }

        match request.options.priority {
            Some(raw) => Ok(Priority::from_signed(raw)?),
            // A misconfigured default is rejected, not coerced; startup
            // validation catches this before any request reaches here
            None => Ok(Priority::new(self.config.default_priority)?),
        }
    }

    /// Resolve the request's selector into deliverable destinations,
    /// collecting a dropped-row for everything filtered out
    async fn resolve(
        &self,
        request: &DeliveryRequest,
    ) -> Result<(Vec<Destination>, Vec<DestinationAccept>), CoordinatorError> {
        let mut drops = Vec::new();

        let resolved = match &request.destinations {
            DestinationSelector::Default(_) => {
                let enabled = self
                    .destinations
                    .list_enabled(&request.organization)
                    .await?;
                // Default selection takes enabled destinations whose health
                // is healthy or degraded
                enabled
                    .into_iter()
                    .filter(|destination| {
                        self.health
                            .snapshot(destination.id)
                            .is_none_or(|health| health.status.is_dispatchable())
                    })
                    .collect()
            }
            DestinationSelector::Explicit(ids) => {
                let mut resolved = Vec::with_capacity(ids.len());
                for &id in ids {
                    match self.destinations.get(id).await? {
                        None => drops.push(drop_row(id, "destination not found")),
                        Some(destination)
                            if destination.organization != request.organization =>
                        {
                            drops.push(drop_row(id, "destination belongs to another organisation"));
                        }
                        Some(destination) if !destination.is_enabled() => {
                            drops.push(drop_row(id, "destination is disabled"));
                        }
                        Some(destination) => resolved.push(destination),
                    }
                }
                resolved
            }
        };

        for drop in &drops {
            if let AcceptStatus::Dropped { reason } = &drop.status {
                tracing::warn!(
                    destination = %drop.destination_id,
                    organization = %request.organization,
                    reason = %reason,
                    "Destination dropped from delivery"
                );
            }
        }

        Ok((resolved, drops))
    }

    fn build_entry(
        &self,
        request: &DeliveryRequest,
        destination: &Destination,
        delivery_id: DeliveryId,
        priority: Priority,
    ) -> QueueEntry {
        let idempotency_key = request.options.idempotency_key.clone().unwrap_or_else(|| {
            format!("{delivery_id}_{destination_id}", destination_id = destination.id)
        });

        let mut entry = QueueEntry::new(
            request.organization.clone(),
            destination.id,
            priority,
            DeliveryPayload {
                delivery_id,
                kind: request.payload.kind.clone(),
                data: request.payload.data.clone(),
                metadata: request.payload.metadata.clone(),
            },
            idempotency_key,
        );
        entry.max_retries = self.config.max_retries;
        entry.correlation_id = request.options.correlation_id.clone();
        if !request.options.tags.is_empty() {
            entry.metadata.insert(
                "tags".to_string(),
                serde_json::Value::from(request.options.tags.clone()),
            );
        }
        entry
    }
}

fn drop_row(destination_id: DestinationId, reason: &str) -> DestinationAccept {
    DestinationAccept {
        destination_id,
        status: AcceptStatus::Dropped {
            reason: reason.to_string(),
        },
    }
}

/// Fold per-destination view rows into the aggregate delivery status
fn aggregate(destinations: &[DestinationStatusView]) -> DeliveryLogStatus {
    if destinations.is_empty() {
        return DeliveryLogStatus::Queued;
    }
    let all_terminal = destinations.iter().all(|row| {
        matches!(
            row.status,
            DestinationDeliveryStatus::Delivered | DestinationDeliveryStatus::Failed
        )
    });
    if all_terminal {
        if destinations
            .iter()
            .any(|row| row.status == DestinationDeliveryStatus::Delivered)
        {
            DeliveryLogStatus::Completed
        } else {
            DeliveryLogStatus::Failed
        }
    } else if destinations
        .iter()
        .any(|row| row.status != DestinationDeliveryStatus::Pending)
    {
        DeliveryLogStatus::Processing
    } else {
        DeliveryLogStatus::Queued
    }
}
