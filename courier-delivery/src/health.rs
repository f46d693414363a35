//! Destination health tracker
//!
//! Folds delivery outcomes into per-destination health records, keeps the
//! circuit breaker coherent with them, and persists every change through
//! the `HealthStore` so the in-memory view is only a projection. On cold
//! start the cache and circuit state are rebuilt from the store.

use std::sync::Arc;

use chrono::Utc;
use courier_core::{
    CircuitState, DestinationHealth, DestinationId, HealthStatus, OrganizationId,
};
use courier_store::HealthStore;
use dashmap::DashMap;

use crate::{
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig},
    events::{AlertKind, AlertSink, NullAlertSink, ThresholdEvent, ThresholdSeverity},
};

/// Tracks health and circuit state for every destination
pub struct HealthTracker {
    store: Arc<dyn HealthStore>,
    breaker: CircuitBreaker,
    cache: DashMap<DestinationId, DestinationHealth>,
    alerts: Arc<dyn AlertSink>,
}

impl std::fmt::Debug for HealthTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthTracker")
            .field("breaker", &self.breaker)
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl HealthTracker {
    /// Create a tracker persisting through `store`
    #[must_use]
    pub fn new(store: Arc<dyn HealthStore>, config: CircuitBreakerConfig) -> Self {
        Self {
            store,
            breaker: CircuitBreaker::new(config),
            cache: DashMap::new(),
            alerts: Arc::new(NullAlertSink),
        }
    }

    /// Attach an alert sink for consecutive-failure events
    #[must_use]
    pub fn with_alert_sink(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = alerts;
        self
    }

    /// Rebuild cache and circuit state from the store
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    pub async fn load(&self) -> courier_store::Result<usize> {
        let records = self.store.list().await?;
        let count = records.len();
        for health in records {
            self.breaker.restore(
                health.destination_id,
                health.circuit_state,
                health.consecutive_failures,
                health.total_deliveries,
                health.circuit_opened_at,
            );
            self.cache.insert(health.destination_id, health);
        }
        Ok(count)
    }

    /// Whether the coordinator may enqueue and the scheduler may dispatch
    ///
    /// Refuses when the circuit gate refuses or when consecutive failures
    /// have classified the destination as health-disabled.
    pub fn permit(&self, destination: DestinationId) -> bool {
        if !self.breaker.permit(destination) {
            return false;
        }
        self.cache
            .get(&destination)
            .is_none_or(|health| health.status != HealthStatus::Disabled)
    }

    /// Circuit state for a destination
    pub fn circuit_state(&self, destination: DestinationId) -> CircuitState {
        self.breaker.state(destination)
    }

    /// Recovery timeout, used as the backoff for circuit refusals
    #[must_use]
    pub fn recovery_timeout(&self) -> chrono::Duration {
        self.breaker.recovery_timeout()
    }

    /// Health snapshot for a destination, if any outcome was ever recorded
    pub fn snapshot(&self, destination: DestinationId) -> Option<DestinationHealth> {
        self.cache.get(&destination).map(|health| health.clone())
    }

    /// Record a successful delivery with its observed latency
    ///
    /// Returns the circuit transition, if one occurred.
    pub async fn record_success(
        &self,
        destination: DestinationId,
        response_time_ms: u64,
    ) -> Option<CircuitState> {
        let transition = self.breaker.record_success(destination);
        let now = Utc::now();

        let mut health = self
            .cache
            .entry(destination)
            .or_insert_with(|| DestinationHealth::new(destination));
        health.apply_success(response_time_ms, now);
        self.sync_circuit(&mut health, destination);
        let snapshot = health.clone();
        drop(health);

        self.persist(snapshot).await;
        transition
    }

    /// Record a failed delivery
    ///
    /// Returns the circuit transition, if one occurred. Raises a
    /// consecutive-failures event once the degraded threshold is reached.
    pub async fn record_failure(
        &self,
        destination: DestinationId,
        organization: &OrganizationId,
        error: &str,
    ) -> Option<CircuitState> {
        let transition = self.breaker.record_failure(destination);
        let now = Utc::now();

        let mut health = self
            .cache
            .entry(destination)
            .or_insert_with(|| DestinationHealth::new(destination));
        health.apply_failure(error, now);
        self.sync_circuit(&mut health, destination);
        let snapshot = health.clone();
        drop(health);

        if snapshot.status != HealthStatus::Healthy {
            let observed = f64::from(snapshot.consecutive_failures);
            self.alerts.raise(ThresholdEvent {
                kind: AlertKind::ConsecutiveFailures,
                organization: Some(organization.clone()),
                destination: Some(destination),
                observed,
                threshold: 3.0,
                severity: ThresholdSeverity::grade(observed, 3.0)
                    .unwrap_or(ThresholdSeverity::Medium),
                message: format!(
                    "destination {destination} has {} consecutive failures ({})",
                    snapshot.consecutive_failures, snapshot.status
                ),
            });
        }

        self.persist(snapshot).await;
        transition
    }

    /// Operator override: pin the circuit open with a reason
    pub async fn force_open(&self, destination: DestinationId, reason: &str) {
        self.breaker.force_open(destination, reason);
        let mut health = self
            .cache
            .entry(destination)
            .or_insert_with(|| DestinationHealth::new(destination));
        self.sync_circuit(&mut health, destination);
        health.metadata.insert(
            "forced_open_reason".to_string(),
            serde_json::Value::String(reason.to_string()),
        );
        let snapshot = health.clone();
        drop(health);
        self.persist(snapshot).await;
    }

    /// Operator override: close the circuit and clear counters
    pub async fn force_close(&self, destination: DestinationId) {
        self.breaker.force_close(destination);
        let mut health = self
            .cache
            .entry(destination)
            .or_insert_with(|| DestinationHealth::new(destination));
        health.consecutive_failures = 0;
        health.status = HealthStatus::classify(0);
        self.sync_circuit(&mut health, destination);
        health.metadata.remove("forced_open_reason");
        let snapshot = health.clone();
        drop(health);
        self.persist(snapshot).await;
    }

    /// All cached health snapshots
    pub fn all(&self) -> Vec<DestinationHealth> {
        self.cache.iter().map(|entry| entry.value().clone()).collect()
    }

    fn sync_circuit(&self, health: &mut DestinationHealth, destination: DestinationId) {
        let circuit = self.breaker.snapshot(destination);
        health.circuit_state = circuit.state;
        health.circuit_opened_at = circuit.opened_at;
        health.metadata.insert(
            "half_open_successes".to_string(),
            serde_json::Value::from(circuit.half_open_successes),
        );
    }

    async fn persist(&self, health: DestinationHealth) {
        // Persistence is best-effort; the store row converges on the next write
        if let Err(error) = self.store.upsert(health).await {
            tracing::warn!(error = %error, "Failed to persist destination health");
        }
    }
}
