//! Delivery log records
//!
//! The delivery log is the queryable per-delivery view: overall status plus
//! one sub-status row per destination. It lives in its own store, indexed
//! by delivery id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{DeliveryId, DestinationId, OrganizationId};

/// Aggregate status of a delivery across all of its destinations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryLogStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

/// Per-destination sub-status within a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationDeliveryStatus {
    Pending,
    Delivered,
    Failed,
    Retrying,
}

/// One destination's row in the delivery log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryLogRecord {
    pub delivery_id: DeliveryId,
    pub organization: OrganizationId,
    pub destination_id: DestinationId,
    pub status: DestinationDeliveryStatus,
    pub attempts: u32,
    /// Opaque identifier returned by the handler (e.g. a message id)
    #[serde(default)]
    pub cross_system_reference: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl DeliveryLogRecord {
    /// Build a record for a successful delivery
    #[must_use]
    pub fn delivered(
        delivery_id: DeliveryId,
        organization: OrganizationId,
        destination_id: DestinationId,
        attempts: u32,
        cross_system_reference: Option<String>,
    ) -> Self {
        Self {
            delivery_id,
            organization,
            destination_id,
            status: DestinationDeliveryStatus::Delivered,
            attempts,
            cross_system_reference,
            failure_reason: None,
            recorded_at: Utc::now(),
        }
    }

    /// Build a record for a terminal failure
    #[must_use]
    pub fn failed(
        delivery_id: DeliveryId,
        organization: OrganizationId,
        destination_id: DestinationId,
        attempts: u32,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            delivery_id,
            organization,
            destination_id,
            status: DestinationDeliveryStatus::Failed,
            attempts,
            cross_system_reference: None,
            failure_reason: Some(reason.into()),
            recorded_at: Utc::now(),
        }
    }

    /// Build a record for an attempt that will be retried
    #[must_use]
    pub fn retrying(
        delivery_id: DeliveryId,
        organization: OrganizationId,
        destination_id: DestinationId,
        attempts: u32,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            delivery_id,
            organization,
            destination_id,
            status: DestinationDeliveryStatus::Retrying,
            attempts,
            cross_system_reference: None,
            failure_reason: Some(reason.into()),
            recorded_at: Utc::now(),
        }
    }
}

/// Fold per-destination sub-statuses into the aggregate delivery status
#[must_use]
pub fn aggregate_status(records: &[DeliveryLogRecord]) -> DeliveryLogStatus {
    if records.is_empty() {
        return DeliveryLogStatus::Queued;
    }
    let all_terminal = records.iter().all(|r| {
        matches!(
            r.status,
            DestinationDeliveryStatus::Delivered | DestinationDeliveryStatus::Failed
        )
    });
    if all_terminal {
        if records
            .iter()
            .any(|r| r.status == DestinationDeliveryStatus::Delivered)
        {
            DeliveryLogStatus::Completed
        } else {
            DeliveryLogStatus::Failed
        }
    } else if records
        .iter()
        .any(|r| r.status != DestinationDeliveryStatus::Pending)
    {
        DeliveryLogStatus::Processing
    } else {
        DeliveryLogStatus::Queued
    }
}
