//! Alert kind dimension
//!
//! The category of condition an alert pertains to. It is the key dimension
//! for debouncing and the unit maintenance windows suppress by.

use serde::{Deserialize, Serialize};

/// The category of condition an alert pertains to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    FailureRate,
    ConsecutiveFailures,
    QueueBacklog,
    ResponseTime,
}

impl AlertKind {
    /// Canonical snake_case name, used as the debounce key dimension
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FailureRate => "failure_rate",
            Self::ConsecutiveFailures => "consecutive_failures",
            Self::QueueBacklog => "queue_backlog",
            Self::ResponseTime => "response_time",
        }
    }

    /// All kinds, for per-kind configuration tables
    #[must_use]
    pub const fn all() -> [Self; 4] {
        [
            Self::FailureRate,
            Self::ConsecutiveFailures,
            Self::QueueBacklog,
            Self::ResponseTime,
        ]
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_names() {
        assert_eq!(AlertKind::FailureRate.as_str(), "failure_rate");
        assert_eq!(
            AlertKind::ConsecutiveFailures.as_str(),
            "consecutive_failures"
        );
        assert_eq!(AlertKind::QueueBacklog.as_str(), "queue_backlog");
        assert_eq!(AlertKind::ResponseTime.as_str(), "response_time");
    }

    #[test]
    fn test_serde_round_trip() {
        let json = serde_json::to_string(&AlertKind::QueueBacklog).unwrap();
        assert_eq!(json, "\"queue_backlog\"");
        let parsed: AlertKind = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, AlertKind::QueueBacklog);
    }
}
