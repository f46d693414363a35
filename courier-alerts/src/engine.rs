//! Alert engine
//!
//! Binds the debouncer, the escalation ladder, the maintenance calendar
//! and the notification channels into one pipeline: raw threshold events
//! in, bounded deduplicated notifications out.

use std::sync::Arc;

use chrono::Utc;
use courier_core::{
    AlertKind, DestinationId, OrgContext, OrganizationId, Signal, internal,
};
use serde::{Deserialize, Serialize};

use crate::{
    channel::{Notification, NotificationChannel},
    config::AlertsConfig,
    debounce::{DebounceKey, Debouncer, Decision, DropReason},
    error::AlertError,
    escalation::{channels_for_level, severity_for_level},
    maintenance::{MaintenanceCalendar, MaintenanceWindow, MaintenanceWindowId},
};

/// One raw alert-worthy event entering the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub kind: AlertKind,
    #[serde(default)]
    pub organization: Option<OrganizationId>,
    #[serde(default)]
    pub destination: Option<DestinationId>,
    pub message: String,
    /// Threshold, observed value, window description
    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl AlertEvent {
    fn key(&self) -> DebounceKey {
        DebounceKey {
            kind: self.kind,
            destination: self.destination,
            organization: self.organization.clone(),
        }
    }
}

/// Debouncing, escalating notification pipeline
pub struct AlertEngine {
    config: AlertsConfig,
    debouncer: Debouncer,
    calendar: Arc<MaintenanceCalendar>,
    channels: Vec<Arc<dyn NotificationChannel>>,
}

impl std::fmt::Debug for AlertEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertEngine")
            .field("tracked_keys", &self.debouncer.len())
            .field("channels", &self.channels.len())
            .finish_non_exhaustive()
    }
}

impl AlertEngine {
    #[must_use]
    pub fn new(config: AlertsConfig, channels: Vec<Arc<dyn NotificationChannel>>) -> Self {
        Self {
            config,
            debouncer: Debouncer::new(),
            calendar: Arc::new(MaintenanceCalendar::new()),
            channels,
        }
    }

    /// The maintenance calendar backing this engine
    #[must_use]
    pub fn calendar(&self) -> Arc<MaintenanceCalendar> {
        self.calendar.clone()
    }

    /// Push one event through maintenance filtering and the debouncer,
    /// emitting a notification when it survives
    pub async fn process(&self, event: AlertEvent) -> Decision {
        let now = Utc::now();

        if self.calendar.suppresses(
            now,
            event.kind,
            event.organization.as_ref(),
            event.destination,
        ) {
            tracing::debug!(
                kind = %event.kind,
                "Event suppressed by maintenance window"
            );
            if let Some(metrics) = courier_metrics::metrics() {
                metrics
                    .alerts
                    .record_suppressed(event.kind.as_str(), DropReason::Maintenance.as_str());
            }
            return Decision::Drop {
                reason: DropReason::Maintenance,
            };
        }

        let decision = self
            .debouncer
            .decide(event.key(), now, self.config.for_kind(event.kind));

        match decision {
            Decision::Allow { level } => {
                self.emit(&event, level).await;
            }
            Decision::Drop { reason } => {
                tracing::debug!(kind = %event.kind, reason = reason.as_str(), "Event debounced");
                if let Some(metrics) = courier_metrics::metrics() {
                    metrics
                        .alerts
                        .record_suppressed(event.kind.as_str(), reason.as_str());
                }
            }
        }
        decision
    }

    /// Mark the condition behind a key resolved, clearing its debounce
    /// state; the next event starts from level 0
    ///
    /// # Errors
    /// Returns [`AlertError::Scope`] when the key belongs to a different
    /// organisation than the context.
    pub fn resolve(
        &self,
        ctx: &OrgContext,
        kind: AlertKind,
        destination: Option<DestinationId>,
        organization: Option<OrganizationId>,
    ) -> Result<bool, AlertError> {
        if let Some(owner) = &organization {
            ctx.ensure_owns(owner)?;
        }
        let cleared = self.debouncer.resolve(&DebounceKey {
            kind,
            destination,
            organization,
        });
        if cleared {
            internal!(level = INFO, "Alert condition resolved, debounce state cleared");
            if let Some(metrics) = courier_metrics::metrics() {
                metrics.alerts.record_resolved(kind.as_str());
            }
        }
        Ok(cleared)
    }

    /// Declare a maintenance window
    ///
    /// # Errors
    /// Returns [`AlertError::Scope`] when the window belongs to a different
    /// organisation than the context.
    pub fn add_maintenance_window(
        &self,
        ctx: &OrgContext,
        window: MaintenanceWindow,
    ) -> Result<MaintenanceWindowId, AlertError> {
        ctx.ensure_owns(&window.organization)?;
        tracing::info!(
            organization = %window.organization,
            reason = %window.reason,
            "Maintenance window declared"
        );
        Ok(self.calendar.add(window))
    }

    /// Remove a maintenance window by id
    pub fn remove_maintenance_window(&self, id: MaintenanceWindowId) -> bool {
        self.calendar.remove(id)
    }

    /// Emit escalation notifications for every key whose delay has elapsed
    pub async fn check_escalations(&self) {
        let escalated = self
            .debouncer
            .check_escalations(Utc::now(), |kind| self.config.for_kind(kind).clone());

        for (key, level) in escalated {
            let event = AlertEvent {
                kind: key.kind,
                organization: key.organization,
                destination: key.destination,
                message: format!("{} condition persists, escalating", key.kind),
                details: serde_json::Map::new(),
            };
            self.emit(&event, level).await;
        }
    }

    /// Drop fully-elapsed debounce state and expired maintenance windows
    pub fn sweep(&self) {
        let now = Utc::now();
        let dropped = self
            .debouncer
            .sweep(now, |kind| self.config.for_kind(kind).clone());
        let expired = self.calendar.sweep(now);
        if dropped > 0 || expired > 0 {
            tracing::debug!(
                debounce_keys = dropped,
                maintenance_windows = expired,
                "Alert state sweep"
            );
        }
    }

    /// Run the escalation checker and sweeper until shutdown
    ///
    /// # Errors
    /// Returns only after a shutdown signal; tick failures are logged.
    pub async fn serve(
        self: Arc<Self>,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), AlertError> {
        internal!(level = INFO, "Alert engine starting");

        let mut sweep_tick = tokio::time::interval(std::time::Duration::from_secs(
            self.config.sweep_interval_secs.max(1),
        ));
        sweep_tick.tick().await;

        loop {
            tokio::select! {
                _ = sweep_tick.tick() => {
                    self.check_escalations().await;
                    self.sweep();
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!(level = INFO, "Alert engine shutting down");
                            break;
                        }
                        Err(error) => {
                            tracing::error!(error = %error, "Alert engine shutdown channel error");
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Build and fan a notification out to the level's channel set
    async fn emit(&self, event: &AlertEvent, level: u8) {
        let severity = severity_for_level(level);
        let channels = channels_for_level(level);

        let notification = Notification {
            id: ulid::Ulid::new(),
            kind: event.kind,
            severity,
            channels: channels.to_vec(),
            organization: event.organization.clone(),
            destination: event.destination,
            message: event.message.clone(),
            escalation_level: level,
            metadata: event.details.clone(),
            created_at: Utc::now(),
        };

        if let Some(metrics) = courier_metrics::metrics() {
            metrics
                .alerts
                .record_generated(event.kind.as_str(), severity.as_str());
        }

        for channel in &self.channels {
            if !channels.contains(&channel.channel()) {
                continue;
            }
            if let Err(error) = channel.send(&notification).await {
                tracing::error!(
                    channel = channel.channel().as_str(),
                    error = %error,
                    "Notification channel failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use courier_core::OrganizationId;

    use super::*;
    use crate::{
        channel::testing::RecordingChannel,
        config::DebounceConfig,
        escalation::Channel,
    };

    fn event(kind: AlertKind, org: &str) -> AlertEvent {
        AlertEvent {
            kind,
            organization: Some(OrganizationId::new(org)),
            destination: None,
            message: "threshold crossed".to_string(),
            details: serde_json::Map::new(),
        }
    }

    fn engine_with(config: AlertsConfig) -> (AlertEngine, RecordingChannel) {
        let email = RecordingChannel::new(Channel::Email);
        let engine = AlertEngine::new(config, vec![Arc::new(email.clone())]);
        (engine, email)
    }

    #[tokio::test]
    async fn test_first_event_notifies_at_low_severity() {
        let (engine, email) = engine_with(AlertsConfig::default());

        let decision = engine
            .process(event(AlertKind::FailureRate, "org-a"))
            .await;
        assert_eq!(decision, Decision::Allow { level: 0 });
        let sent = email.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].severity, crate::escalation::Severity::Low);
        assert_eq!(sent[0].channels, vec![Channel::Email]);
    }

    #[tokio::test]
    async fn test_cooldown_drops_second_event() {
        let (engine, email) = engine_with(AlertsConfig::default());

        engine.process(event(AlertKind::FailureRate, "org-a")).await;
        let decision = engine
            .process(event(AlertKind::FailureRate, "org-a"))
            .await;
        assert_eq!(
            decision,
            Decision::Drop {
                reason: DropReason::Cooldown
            }
        );
        assert_eq!(email.count(), 1);
    }

    #[tokio::test]
    async fn test_keys_debounce_independently() {
        let (engine, email) = engine_with(AlertsConfig::default());

        engine.process(event(AlertKind::FailureRate, "org-a")).await;
        engine.process(event(AlertKind::QueueBacklog, "org-a")).await;
        engine.process(event(AlertKind::FailureRate, "org-b")).await;
        assert_eq!(email.count(), 3, "distinct keys are not deduplicated");
    }

    #[tokio::test]
    async fn test_maintenance_window_silences_kind_for_org() {
        let (engine, email) = engine_with(AlertsConfig::default());
        let ctx = OrgContext::new(OrganizationId::new("org-a"));
        let now = Utc::now();

        engine
            .add_maintenance_window(
                &ctx,
                MaintenanceWindow {
                    id: ulid::Ulid::new(),
                    organization: OrganizationId::new("org-a"),
                    destination: None,
                    starts_at: (now - Duration::minutes(1)).naive_utc(),
                    ends_at: (now + Duration::hours(1)).naive_utc(),
                    timezone: chrono_tz::UTC,
                    kinds: [AlertKind::ConsecutiveFailures].into_iter().collect(),
                    reason: "planned failover".to_string(),
                    created_by: "ops".to_string(),
                },
            )
            .unwrap();

        // Suppressed kind drops regardless of volume
        for _ in 0..10 {
            let decision = engine
                .process(event(AlertKind::ConsecutiveFailures, "org-a"))
                .await;
            assert_eq!(
                decision,
                Decision::Drop {
                    reason: DropReason::Maintenance
                }
            );
        }
        // Unlisted kinds still alert
        engine.process(event(AlertKind::FailureRate, "org-a")).await;
        assert_eq!(email.count(), 1);
    }

    #[tokio::test]
    async fn test_cross_org_maintenance_window_rejected() {
        let (engine, _email) = engine_with(AlertsConfig::default());
        let ctx = OrgContext::new(OrganizationId::new("org-a"));
        let now = Utc::now();

        let result = engine.add_maintenance_window(
            &ctx,
            MaintenanceWindow {
                id: ulid::Ulid::new(),
                organization: OrganizationId::new("org-b"),
                destination: None,
                starts_at: now.naive_utc(),
                ends_at: (now + Duration::hours(1)).naive_utc(),
                timezone: chrono_tz::UTC,
                kinds: [AlertKind::FailureRate].into_iter().collect(),
                reason: "not ours".to_string(),
                created_by: "ops".to_string(),
            },
        );
        assert!(matches!(result, Err(AlertError::Scope(_))));
    }

    #[tokio::test]
    async fn test_resolution_clears_state() {
        let config = AlertsConfig {
            defaults: DebounceConfig {
                cooldown_secs: 3600,
                ..DebounceConfig::default()
            },
            ..AlertsConfig::default()
        };
        let (engine, email) = engine_with(config);
        let ctx = OrgContext::new(OrganizationId::new("org-a"));

        engine.process(event(AlertKind::FailureRate, "org-a")).await;
        // Cooldown would drop a repeat, but resolution resets the key
        engine
            .resolve(
                &ctx,
                AlertKind::FailureRate,
                None,
                Some(OrganizationId::new("org-a")),
            )
            .unwrap();
        let decision = engine
            .process(event(AlertKind::FailureRate, "org-a"))
            .await;
        assert_eq!(decision, Decision::Allow { level: 0 });
        assert_eq!(email.count(), 2);
    }
}
