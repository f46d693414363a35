//! Shared domain model for the courier delivery engine.
//!
//! This crate holds the types every other courier crate speaks in:
//! identifiers, destinations, queue entries, destination health, delivery
//! logs, and the organisation scoping rules, along with logging setup.

#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod alert;
pub mod destination;
pub mod entry;
pub mod health;
pub mod id;
pub mod log;
pub mod logging;
pub mod scope;
pub mod secrets;

pub use alert::AlertKind;
pub use destination::{Destination, DestinationKind, Disabled};
pub use entry::{DeliveryAttempt, DeliveryPayload, EntryStatus, Priority, QueueEntry};
pub use health::{CircuitState, DestinationHealth, HealthStatus};
pub use id::{DeliveryId, DestinationId, EntryId, OrganizationId};
pub use log::{DeliveryLogRecord, DeliveryLogStatus, DestinationDeliveryStatus};
pub use scope::{OrgContext, ScopeError};
pub use secrets::{DownloadLink, WebhookSecret};
pub use tracing;

/// Control signal broadcast to long-running components.
#[derive(Debug, Clone, Copy)]
pub enum Signal {
    Shutdown,
    Finalised,
}
