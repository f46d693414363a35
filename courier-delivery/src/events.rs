//! Threshold events raised toward the alerting pipeline
//!
//! The queue manager and the health tracker produce a raw stream of
//! threshold crossings; the alert engine debounces and escalates them. The
//! [`AlertSink`] port keeps this crate independent of the alerting
//! implementation.

pub use courier_core::AlertKind;
use courier_core::{DestinationId, OrganizationId};
use serde::{Deserialize, Serialize};

/// How far past its threshold the observed value is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdSeverity {
    /// Observed ≥ 1.5× threshold
    Medium,
    /// Observed ≥ 2× threshold
    High,
    /// Observed ≥ 3× threshold
    Critical,
}

impl ThresholdSeverity {
    /// Grade an observation against its threshold
    ///
    /// Returns `None` when the threshold is not crossed.
    #[must_use]
    pub fn grade(observed: f64, threshold: f64) -> Option<Self> {
        if threshold <= 0.0 || observed < threshold {
            return None;
        }
        let ratio = observed / threshold;
        if ratio >= 3.0 {
            Some(Self::Critical)
        } else if ratio >= 2.0 {
            Some(Self::High)
        } else {
            // Any crossing below the 2x band reports as medium
            Some(Self::Medium)
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// One threshold crossing, addressed by the debounce key dimensions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdEvent {
    pub kind: AlertKind,
    #[serde(default)]
    pub organization: Option<OrganizationId>,
    #[serde(default)]
    pub destination: Option<DestinationId>,
    pub observed: f64,
    pub threshold: f64,
    pub severity: ThresholdSeverity,
    /// Human-readable summary carried into notifications
    pub message: String,
}

/// Receiver of threshold events, implemented by the alert engine wiring
pub trait AlertSink: Send + Sync {
    fn raise(&self, event: ThresholdEvent);
}

/// Sink that discards every event, for tests and headless deployments
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAlertSink;

impl AlertSink for NullAlertSink {
    fn raise(&self, _event: ThresholdEvent) {}
}
