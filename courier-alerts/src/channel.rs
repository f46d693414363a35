//! Notification channel port
//!
//! A channel delivers finished notifications to operators (email, chat,
//! pager, phone). Channel failures are logged and never propagate back
//! into the alerting pipeline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::{AlertKind, DestinationId, OrganizationId};
use serde::{Deserialize, Serialize};

use crate::{
    error::AlertError,
    escalation::{Channel, Severity},
};

/// A finished, deduplicated notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: ulid::Ulid,
    pub kind: AlertKind,
    pub severity: Severity,
    /// Channels this notification targets at its escalation level
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub organization: Option<OrganizationId>,
    #[serde(default)]
    pub destination: Option<DestinationId>,
    pub message: String,
    pub escalation_level: u8,
    /// Kind, threshold, observed value, window description
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Transport for notifications of one channel class
#[async_trait]
pub trait NotificationChannel: Send + Sync + std::fmt::Debug {
    /// Which channel class this transport serves
    fn channel(&self) -> Channel;

    /// Deliver one notification
    ///
    /// # Errors
    /// Returns an error when the transport fails; the engine logs it and
    /// moves on.
    async fn send(&self, notification: &Notification) -> Result<(), AlertError>;
}

/// Console binding: writes notifications to the tracing subscriber
#[derive(Debug, Clone, Copy)]
pub struct TracingChannel {
    channel: Channel,
}

impl TracingChannel {
    #[must_use]
    pub const fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl NotificationChannel for TracingChannel {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, notification: &Notification) -> Result<(), AlertError> {
        tracing::warn!(
            target: "courier::alerts",
            channel = self.channel.as_str(),
            kind = %notification.kind,
            severity = %notification.severity,
            level = notification.escalation_level,
            organization = ?notification.organization,
            destination = ?notification.destination,
            "{}",
            notification.message
        );
        Ok(())
    }
}

pub mod testing {
    //! Recording channel for test suites

    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::{AlertError, Channel, Notification, NotificationChannel, async_trait};

    /// Channel that captures every notification it receives
    #[derive(Debug, Clone)]
    pub struct RecordingChannel {
        channel: Channel,
        sent: Arc<Mutex<Vec<Notification>>>,
    }

    impl RecordingChannel {
        #[must_use]
        pub fn new(channel: Channel) -> Self {
            Self {
                channel,
                sent: Arc::new(Mutex::new(Vec::new())),
            }
        }

        /// All notifications sent through this channel
        #[must_use]
        pub fn sent(&self) -> Vec<Notification> {
            self.sent.lock().clone()
        }

        #[must_use]
        pub fn count(&self) -> usize {
            self.sent.lock().len()
        }
    }

    #[async_trait]
    impl NotificationChannel for RecordingChannel {
        fn channel(&self) -> Channel {
            self.channel
        }

        async fn send(&self, notification: &Notification) -> Result<(), AlertError> {
            self.sent.lock().push(notification.clone());
            Ok(())
        }
    }
}
