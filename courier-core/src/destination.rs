//! Destination records
//!
//! A destination is a configured sink for payloads: a webhook URL, an email
//! address set, an object-storage path, an SFTP target, or a download-link
//! bucket. The kind-specific configuration is opaque to the engine; only
//! the protocol handler for that kind interprets it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{DestinationId, OrganizationId};

/// The transport kind of a destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationKind {
    Webhook,
    Email,
    Storage,
    Sftp,
    Download,
}

impl DestinationKind {
    /// Canonical lowercase name, as persisted
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::Email => "email",
            Self::Storage => "storage",
            Self::Sftp => "sftp",
            Self::Download => "download",
        }
    }
}

impl std::fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of who disabled a destination, when, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disabled {
    pub at: DateTime<Utc>,
    pub actor: String,
    pub reason: String,
}

/// A configured delivery sink
///
/// Invariants: `organization` is immutable for the life of the record, and
/// a disabled destination is never dispatched to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Destination {
    pub id: DestinationId,
    pub organization: OrganizationId,
    pub kind: DestinationKind,
    /// Human-readable label shown in listings and alerts
    pub label: String,
    /// Kind-specific configuration, opaque to the engine
    pub config: serde_json::Value,
    /// `Some` when the destination has been disabled
    #[serde(default)]
    pub disabled: Option<Disabled>,
    /// Number of deliveries ever enqueued to this destination
    #[serde(default)]
    pub usage_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Destination {
    /// Create a new enabled destination
    #[must_use]
    pub fn new(
        organization: OrganizationId,
        kind: DestinationKind,
        label: impl Into<String>,
        config: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: DestinationId::generate(),
            organization,
            kind,
            label: label.into(),
            config,
            disabled: None,
            usage_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this destination may receive deliveries
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.disabled.is_none()
    }

    /// Disable the destination, recording the actor and reason
    pub fn disable(&mut self, actor: impl Into<String>, reason: impl Into<String>) {
        let now = Utc::now();
        self.disabled = Some(Disabled {
            at: now,
            actor: actor.into(),
            reason: reason.into(),
        });
        self.updated_at = now;
    }

    /// Re-enable a disabled destination
    pub fn enable(&mut self) {
        self.disabled = None;
        self.updated_at = Utc::now();
    }
}
