//! Request and response types for the delivery coordinator

use ahash::AHashMap;
use courier_core::{
    DeliveryId, DeliveryLogStatus, DestinationDeliveryStatus, DestinationId, OrganizationId,
};
use serde::{Deserialize, Serialize};

/// Which destinations a delivery request targets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DestinationSelector {
    /// The organisation's enabled destinations that are healthy or degraded
    Default(DefaultSelector),
    /// An explicit destination list; unknown, foreign and disabled entries
    /// are dropped with a logged reason
    Explicit(Vec<DestinationId>),
}

/// Marker for the `"default"` selector literal
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum DefaultSelector {
    #[serde(rename = "default")]
    Default,
}

impl DestinationSelector {
    /// The `"default"` selector
    #[must_use]
    pub const fn default_destinations() -> Self {
        Self::Default(DefaultSelector::Default)
    }
}

/// The payload portion of a delivery request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPayload {
    /// Caller-declared payload type tag ("report", "export", ...)
    #[serde(rename = "type")]
    pub kind: String,
    /// Opaque JSON document to deliver
    pub data: serde_json::Value,
    #[serde(default)]
    pub metadata: AHashMap<String, serde_json::Value>,
}

/// Request options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryOptions {
    /// Dispatch priority 0-10; out-of-range values are rejected
    #[serde(default)]
    pub priority: Option<i64>,
    /// Caller-supplied idempotency key; the engine derives a
    /// per-destination key when absent
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A request to deliver one payload to one or more destinations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRequest {
    pub organization: OrganizationId,
    pub destinations: DestinationSelector,
    pub payload: RequestPayload,
    #[serde(default)]
    pub options: DeliveryOptions,
}

/// Per-destination outcome of request acceptance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "status")]
pub enum AcceptStatus {
    /// A queue entry was persisted
    Queued,
    /// The destination was dropped during resolution or gating
    Dropped { reason: String },
    /// An entry already existed for this idempotency key
    Duplicate { delivery_id: DeliveryId },
}

/// One destination's row in the acceptance response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationAccept {
    pub destination_id: DestinationId,
    #[serde(flatten)]
    pub status: AcceptStatus,
}

/// Aggregate response to a delivery request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryResponse {
    pub delivery_id: DeliveryId,
    pub status: DeliveryLogStatus,
    pub destinations: Vec<DestinationAccept>,
}

/// One destination's row in a delivery status view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationStatusView {
    pub destination_id: DestinationId,
    pub status: DestinationDeliveryStatus,
    pub attempts: u32,
    #[serde(default)]
    pub cross_system_reference: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

/// Aggregate status of a delivery, derived from queue entries and the
/// delivery log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryStatusView {
    pub delivery_id: DeliveryId,
    pub status: DeliveryLogStatus,
    pub destinations: Vec<DestinationStatusView>,
}
