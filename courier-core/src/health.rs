//! Destination health snapshots
//!
//! One record per destination. Health status is a pure function of the
//! consecutive-failure counter; circuit state is tracked alongside it and
//! the two are kept coherent by the health tracker.

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::DestinationId;

/// Health classification of a destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    /// The destination will not be auto-dispatched to
    Disabled,
}

impl HealthStatus {
    /// Classify from the consecutive-failure counter
    ///
    /// ≥10 disabled, ≥5 unhealthy, ≥3 degraded, else healthy.
    #[must_use]
    pub const fn classify(consecutive_failures: u32) -> Self {
        match consecutive_failures {
            0..=2 => Self::Healthy,
            3..=4 => Self::Degraded,
            5..=9 => Self::Unhealthy,
            _ => Self::Disabled,
        }
    }

    /// Canonical lowercase name, as persisted
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
            Self::Disabled => "disabled",
        }
    }

    /// Whether the destination may be selected for dispatch
    #[must_use]
    pub const fn is_dispatchable(self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circuit breaker state for a destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Canonical name, as persisted
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-destination health record
///
/// Invariants: `status == HealthStatus::classify(consecutive_failures)`;
/// `circuit_opened_at` is `Some` iff `circuit_state == Open`; any recorded
/// success resets `consecutive_failures` to 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationHealth {
    pub destination_id: DestinationId,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub total_deliveries: u64,
    /// Rolling lifetime average of successful-call latency in milliseconds
    pub average_response_time_ms: f64,
    #[serde(default)]
    pub last_success_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_failure_at: Option<DateTime<Utc>>,
    pub status: HealthStatus,
    pub circuit_state: CircuitState,
    #[serde(default)]
    pub circuit_opened_at: Option<DateTime<Utc>>,
    /// Last error string, half-open success counter, operator notes
    #[serde(default)]
    pub metadata: AHashMap<String, serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}

impl DestinationHealth {
    /// Create a fresh healthy record for a destination
    #[must_use]
    pub fn new(destination_id: DestinationId) -> Self {
        Self {
            destination_id,
            consecutive_failures: 0,
            total_failures: 0,
            total_deliveries: 0,
            average_response_time_ms: 0.0,
            last_success_at: None,
            last_failure_at: None,
            status: HealthStatus::Healthy,
            circuit_state: CircuitState::Closed,
            circuit_opened_at: None,
            metadata: AHashMap::new(),
            updated_at: Utc::now(),
        }
    }

    /// Fold a successful delivery into the record
    ///
    /// Resets the consecutive-failure counter and updates the rolling
    /// average response time: `avg = (avg·(n-1) + sample) / n` where `n`
    /// counts successful deliveries.
    pub fn apply_success(&mut self, response_time_ms: u64, at: DateTime<Utc>) {
        self.total_deliveries += 1;
        self.consecutive_failures = 0;
        self.status = HealthStatus::Healthy;
        self.last_success_at = Some(at);
        self.updated_at = at;
        self.metadata.remove("last_error");

        #[allow(clippy::cast_precision_loss)]
        let successes = (self.total_deliveries - self.total_failures).max(1) as f64;
        #[allow(clippy::cast_precision_loss)]
        let sample = response_time_ms as f64;
        self.average_response_time_ms =
            (self.average_response_time_ms * (successes - 1.0) + sample) / successes;
    }

    /// Fold a failed delivery into the record
    pub fn apply_failure(&mut self, error: &str, at: DateTime<Utc>) {
        self.total_deliveries += 1;
        self.total_failures += 1;
        self.consecutive_failures += 1;
        self.status = HealthStatus::classify(self.consecutive_failures);
        self.last_failure_at = Some(at);
        self.updated_at = at;
        self.metadata.insert(
            "last_error".to_string(),
            serde_json::Value::String(error.to_string()),
        );
    }
}
