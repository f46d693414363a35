//! Signed download links and webhook secrets
//!
//! Two small persistence concerns that sit beside the queue: download
//! destinations hand out signed, expiring links to the delivered payload,
//! and webhook destinations sign their posts with a rotating secret.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{DeliveryId, DestinationId, OrganizationId};

/// A signed, expiring link to a delivered payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadLink {
    /// The signed token; also the lookup key
    pub token: String,
    pub organization: OrganizationId,
    pub destination_id: DestinationId,
    pub delivery_id: DeliveryId,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// How many times the link has been fetched
    #[serde(default)]
    pub download_count: u64,
}

impl DownloadLink {
    /// Whether the link can still be served at `now`
    #[must_use]
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// A webhook signing secret
///
/// Rotation keeps the previous secret alongside the active one so
/// receivers can verify in-flight posts signed before the rotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSecret {
    pub destination_id: DestinationId,
    pub secret: String,
    /// The previous secret, kept for one rotation period
    #[serde(default)]
    pub previous_secret: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub rotated_at: Option<DateTime<Utc>>,
}

impl WebhookSecret {
    /// Create a fresh secret for a destination
    #[must_use]
    pub fn new(destination_id: DestinationId, secret: impl Into<String>) -> Self {
        Self {
            destination_id,
            secret: secret.into(),
            previous_secret: None,
            created_at: Utc::now(),
            rotated_at: None,
        }
    }

    /// Replace the active secret, retaining the old one for verification
    pub fn rotate(&mut self, secret: impl Into<String>) {
        self.previous_secret = Some(std::mem::replace(&mut self.secret, secret.into()));
        self.rotated_at = Some(Utc::now());
    }

    /// Whether `candidate` matches the active or the retained secret
    #[must_use]
    pub fn verifies(&self, candidate: &str) -> bool {
        self.secret == candidate
            || self
                .previous_secret
                .as_deref()
                .is_some_and(|previous| previous == candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_link_expiry() {
        let now = Utc::now();
        let link = DownloadLink {
            token: "tok".to_string(),
            organization: OrganizationId::new("org-a"),
            destination_id: DestinationId::generate(),
            delivery_id: DeliveryId::generate(),
            expires_at: now + chrono::Duration::hours(1),
            created_at: now,
            download_count: 0,
        };
        assert!(link.is_valid(now));
        assert!(!link.is_valid(now + chrono::Duration::hours(2)));
    }

    #[test]
    fn test_secret_rotation_keeps_previous() {
        let mut secret = WebhookSecret::new(DestinationId::generate(), "first");
        assert!(secret.verifies("first"));
        assert!(!secret.verifies("second"));

        secret.rotate("second");
        assert!(secret.verifies("second"));
        assert!(secret.verifies("first"), "previous secret still verifies");
        assert!(secret.rotated_at.is_some());

        secret.rotate("third");
        assert!(!secret.verifies("first"), "only one previous secret is kept");
    }
}
