//! Per-destination circuit breaker to prevent retry storms
//!
//! Protects destinations that are experiencing prolonged outages: after a
//! threshold of consecutive failures the circuit opens and dispatch is
//! refused immediately, without consuming a delivery attempt against the
//! destination.
//!
//! # State Transitions
//!
//! ```text
//! ┌─────────┐  failures ≥ threshold AND volume met  ┌──────┐
//! │ Closed  │ ────────────────────────────────────> │ Open │
//! └─────────┘                                       └──────┘
//!     ^                                                │
//!     │                                                │ recovery timeout
//!     │  successes ≥ success threshold                 v
//!     │                          ┌───────────────┐
//!     └──────────────────────────│   Half-Open   │
//!                                └───────────────┘
//!                                        │
//!                                        │ any failure
//!                                        v
//!                                  ┌──────┐
//!                                  │ Open │
//!                                  └──────┘
//! ```
//!
//! A circuit below the minimum delivery volume never opens, so a brand-new
//! destination is not tripped by its first few teething failures.

use chrono::{DateTime, Duration, Utc};
use courier_core::{CircuitState, DestinationId};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures required to open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long the circuit stays open before testing recovery (seconds)
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,

    /// Number of consecutive successes needed to close from half-open
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    /// Observation window for failure statistics (seconds)
    #[serde(default = "default_monitoring_window_secs")]
    pub monitoring_window_secs: u64,

    /// Minimum total deliveries before the circuit may open
    #[serde(default = "default_volume_threshold")]
    pub volume_threshold: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            success_threshold: default_success_threshold(),
            monitoring_window_secs: default_monitoring_window_secs(),
            volume_threshold: default_volume_threshold(),
        }
    }
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_recovery_timeout_secs() -> u64 {
    60
}

const fn default_success_threshold() -> u32 {
    3
}

const fn default_monitoring_window_secs() -> u64 {
    300 // 5 minutes
}

const fn default_volume_threshold() -> u64 {
    10
}

/// Per-destination circuit state
#[derive(Debug, Clone)]
struct CircuitData {
    state: CircuitState,
    consecutive_failures: u32,
    total_deliveries: u64,
    opened_at: Option<DateTime<Utc>>,
    half_open_successes: u32,
    /// Reason set by `force_open`; pins the circuit open until `force_close`
    forced_reason: Option<String>,
}

impl CircuitData {
    const fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            total_deliveries: 0,
            opened_at: None,
            half_open_successes: 0,
            forced_reason: None,
        }
    }

    fn open(&mut self, now: DateTime<Utc>) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.half_open_successes = 0;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.half_open_successes = 0;
        self.forced_reason = None;
    }
}

/// Snapshot of one destination's circuit, for persistence and monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_deliveries: u64,
    pub opened_at: Option<DateTime<Utc>>,
    pub half_open_successes: u32,
    pub forced_reason: Option<String>,
}

/// Per-destination circuit breaker manager
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    circuits: DashMap<DestinationId, CircuitData>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker manager
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: DashMap::new(),
        }
    }

    /// The configured recovery timeout, used as the requeue backoff when a
    /// dispatch is refused
    #[must_use]
    pub fn recovery_timeout(&self) -> Duration {
        Duration::seconds(i64::try_from(self.config.recovery_timeout_secs).unwrap_or(i64::MAX))
    }

    /// Check whether dispatch to this destination is permitted
    ///
    /// Closed circuits permit. Open circuits refuse until the recovery
    /// timeout elapses, then transition to half-open and permit a trial.
    /// Half-open circuits permit trial requests. Force-opened circuits
    /// refuse until an operator closes them.
    pub fn permit(&self, destination: DestinationId) -> bool {
        let now = Utc::now();
        let mut circuit = self.circuits.entry(destination).or_insert_with(CircuitData::new);

        match circuit.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if circuit.forced_reason.is_some() {
                    return false;
                }
                let elapsed = circuit
                    .opened_at
                    .is_some_and(|at| now - at >= self.recovery_timeout());
                if elapsed {
                    circuit.state = CircuitState::HalfOpen;
                    circuit.half_open_successes = 0;
                    tracing::info!(
                        destination = %destination,
                        "Circuit entering half-open state, testing recovery"
                    );
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful delivery
    ///
    /// Returns the new state when a transition occurred.
    pub fn record_success(&self, destination: DestinationId) -> Option<CircuitState> {
        let mut circuit = self.circuits.entry(destination).or_insert_with(CircuitData::new);
        circuit.total_deliveries += 1;
        circuit.consecutive_failures = 0;

        match circuit.state {
            CircuitState::Closed => None,
            CircuitState::HalfOpen => {
                circuit.half_open_successes += 1;
                if circuit.half_open_successes >= self.config.success_threshold {
                    circuit.close();
                    tracing::info!(
                        destination = %destination,
                        "Circuit closed, normal operation resumed"
                    );
                    Some(CircuitState::Closed)
                } else {
                    None
                }
            }
            CircuitState::Open => {
                // Success while open means the gate was bypassed; degrade
                // gracefully into a recovery trial
                tracing::warn!(
                    destination = %destination,
                    "Success recorded while circuit open, entering half-open"
                );
                circuit.state = CircuitState::HalfOpen;
                circuit.half_open_successes = 1;
                Some(CircuitState::HalfOpen)
            }
        }
    }

    /// Record a failed delivery
    ///
    /// Returns the new state when a transition occurred.
    pub fn record_failure(&self, destination: DestinationId) -> Option<CircuitState> {
        let now = Utc::now();
        let mut circuit = self.circuits.entry(destination).or_insert_with(CircuitData::new);
        circuit.total_deliveries += 1;
        circuit.consecutive_failures += 1;

        match circuit.state {
            CircuitState::Closed => {
                if circuit.consecutive_failures >= self.config.failure_threshold
                    && circuit.total_deliveries >= self.config.volume_threshold
                {
                    circuit.open(now);
                    tracing::warn!(
                        destination = %destination,
                        consecutive_failures = circuit.consecutive_failures,
                        threshold = self.config.failure_threshold,
                        recovery_timeout_secs = self.config.recovery_timeout_secs,
                        "Circuit OPENED, refusing dispatch to protect against retry storm"
                    );
                    Some(CircuitState::Open)
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                circuit.open(now);
                tracing::warn!(
                    destination = %destination,
                    "Recovery trial failed, circuit re-opened"
                );
                Some(CircuitState::Open)
            }
            CircuitState::Open => None,
        }
    }

    /// Operator override: pin the circuit open
    pub fn force_open(&self, destination: DestinationId, reason: impl Into<String>) {
        let reason = reason.into();
        let mut circuit = self.circuits.entry(destination).or_insert_with(CircuitData::new);
        circuit.open(Utc::now());
        circuit.forced_reason = Some(reason.clone());
        tracing::warn!(destination = %destination, reason = %reason, "Circuit force-opened");
    }

    /// Operator override: close the circuit and clear counters
    pub fn force_close(&self, destination: DestinationId) {
        let mut circuit = self.circuits.entry(destination).or_insert_with(CircuitData::new);
        circuit.close();
        tracing::info!(destination = %destination, "Circuit force-closed");
    }

    /// Current state for a destination
    pub fn state(&self, destination: DestinationId) -> CircuitState {
        self.circuits
            .get(&destination)
            .map_or(CircuitState::Closed, |circuit| circuit.state)
    }

    /// Snapshot for persistence and monitoring
    pub fn snapshot(&self, destination: DestinationId) -> CircuitSnapshot {
        let circuit = self.circuits.entry(destination).or_insert_with(CircuitData::new);
        CircuitSnapshot {
            state: circuit.state,
            consecutive_failures: circuit.consecutive_failures,
            total_deliveries: circuit.total_deliveries,
            opened_at: circuit.opened_at,
            half_open_successes: circuit.half_open_successes,
            forced_reason: circuit.forced_reason.clone(),
        }
    }

    /// Seed a circuit from persisted state, for cold start
    pub fn restore(
        &self,
        destination: DestinationId,
        state: CircuitState,
        consecutive_failures: u32,
        total_deliveries: u64,
        opened_at: Option<DateTime<Utc>>,
    ) {
        self.circuits.insert(
            destination,
            CircuitData {
                state,
                consecutive_failures,
                total_deliveries,
                opened_at,
                half_open_successes: 0,
                forced_reason: None,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32, volume_threshold: u64) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold,
            recovery_timeout_secs: 0,
            success_threshold: 3,
            monitoring_window_secs: 300,
            volume_threshold,
        })
    }

    #[test]
    fn test_closed_to_open_at_threshold() {
        let breaker = breaker(3, 0);
        let destination = DestinationId::generate();

        assert!(breaker.permit(destination));
        assert_eq!(breaker.record_failure(destination), None);
        assert_eq!(breaker.record_failure(destination), None);
        assert_eq!(
            breaker.record_failure(destination),
            Some(CircuitState::Open)
        );

        let snapshot = breaker.snapshot(destination);
        assert_eq!(snapshot.state, CircuitState::Open);
        assert!(snapshot.opened_at.is_some(), "open implies opened_at set");
    }

    #[test]
    fn test_volume_threshold_gates_opening() {
        let breaker = breaker(3, 10);
        let destination = DestinationId::generate();

        // Plenty of consecutive failures, but below the volume floor
        for _ in 0..9 {
            assert_eq!(breaker.record_failure(destination), None);
        }
        assert_eq!(breaker.state(destination), CircuitState::Closed);

        // Tenth delivery reaches the volume floor and trips
        assert_eq!(
            breaker.record_failure(destination),
            Some(CircuitState::Open)
        );
    }

    #[test]
    fn test_open_refuses_until_timeout_then_half_open() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout_secs: 3600,
            success_threshold: 1,
            monitoring_window_secs: 300,
            volume_threshold: 0,
        });
        let destination = DestinationId::generate();

        breaker.record_failure(destination);
        breaker.record_failure(destination);
        assert_eq!(breaker.state(destination), CircuitState::Open);

        // Timeout has not elapsed: permit stays false
        assert!(!breaker.permit(destination));
        assert!(!breaker.permit(destination));
        assert_eq!(breaker.state(destination), CircuitState::Open);
    }

    #[test]
    fn test_half_open_closes_after_success_threshold() {
        let breaker = breaker(2, 0);
        let destination = DestinationId::generate();

        breaker.record_failure(destination);
        breaker.record_failure(destination);
        assert_eq!(breaker.state(destination), CircuitState::Open);

        // Zero recovery timeout: next permit transitions to half-open
        assert!(breaker.permit(destination));
        assert_eq!(breaker.state(destination), CircuitState::HalfOpen);

        assert_eq!(breaker.record_success(destination), None);
        assert_eq!(breaker.record_success(destination), None);
        assert_eq!(
            breaker.record_success(destination),
            Some(CircuitState::Closed)
        );

        let snapshot = breaker.snapshot(destination);
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert!(snapshot.opened_at.is_none(), "closed implies opened_at cleared");
        assert_eq!(snapshot.consecutive_failures, 0);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let breaker = breaker(2, 0);
        let destination = DestinationId::generate();

        breaker.record_failure(destination);
        breaker.record_failure(destination);
        assert!(breaker.permit(destination));
        assert_eq!(breaker.state(destination), CircuitState::HalfOpen);

        assert_eq!(
            breaker.record_failure(destination),
            Some(CircuitState::Open)
        );
    }

    #[test]
    fn test_force_open_pins_circuit() {
        let breaker = breaker(5, 0);
        let destination = DestinationId::generate();

        breaker.force_open(destination, "maintenance");
        // Zero recovery timeout would normally half-open, but forced stays shut
        assert!(!breaker.permit(destination));
        assert_eq!(
            breaker.snapshot(destination).forced_reason.as_deref(),
            Some("maintenance")
        );

        breaker.force_close(destination);
        assert!(breaker.permit(destination));
        assert_eq!(breaker.state(destination), CircuitState::Closed);
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let breaker = breaker(3, 0);
        let destination = DestinationId::generate();

        breaker.record_failure(destination);
        breaker.record_failure(destination);
        breaker.record_success(destination);

        breaker.record_failure(destination);
        breaker.record_failure(destination);
        assert_eq!(breaker.state(destination), CircuitState::Closed);
    }

    #[test]
    fn test_restore_from_persisted_state() {
        let breaker = breaker(5, 0);
        let destination = DestinationId::generate();
        let opened = Utc::now() - Duration::seconds(10);

        breaker.restore(destination, CircuitState::Open, 7, 20, Some(opened));
        let snapshot = breaker.snapshot(destination);
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.consecutive_failures, 7);
        assert_eq!(snapshot.opened_at, Some(opened));
    }
}
