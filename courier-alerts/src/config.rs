//! Debounce configuration
//!
//! Each alert kind carries its own window, cooldown and escalation timing;
//! unlisted kinds fall back to the defaults.

use std::collections::HashMap;

use courier_core::AlertKind;
use serde::{Deserialize, Serialize};

const fn default_window_secs() -> u64 {
    900 // 15 minutes
}

const fn default_cooldown_secs() -> u64 {
    3600 // 60 minutes
}

const fn default_max_alerts_per_window() -> u32 {
    3
}

const fn default_escalation_delay_secs() -> u64 {
    3600 // 60 minutes
}

const fn default_sweep_interval_secs() -> u64 {
    300 // 5 minutes
}

/// Debounce timing for one alert kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebounceConfig {
    /// Rolling window length (seconds)
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Minimum spacing between consecutive alerts for one key (seconds)
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Alerts allowed within one window before suppression
    #[serde(default = "default_max_alerts_per_window")]
    pub max_alerts_per_window: u32,

    /// Delay between escalation levels (seconds); delays are ladder-relative
    #[serde(default = "default_escalation_delay_secs")]
    pub escalation_delay_secs: u64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            cooldown_secs: default_cooldown_secs(),
            max_alerts_per_window: default_max_alerts_per_window(),
            escalation_delay_secs: default_escalation_delay_secs(),
        }
    }
}

/// Configuration for the alert engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    /// Per-kind overrides of the debounce defaults
    #[serde(default)]
    pub kinds: HashMap<AlertKind, DebounceConfig>,

    /// Fallback for kinds without an override
    #[serde(default)]
    pub defaults: DebounceConfig,

    /// How often fully-elapsed debounce state is swept and pending
    /// escalations are checked (seconds)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            kinds: HashMap::new(),
            defaults: DebounceConfig::default(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl AlertsConfig {
    /// Debounce timing for `kind`, falling back to the defaults
    #[must_use]
    pub fn for_kind(&self, kind: AlertKind) -> &DebounceConfig {
        self.kinds.get(&kind).unwrap_or(&self.defaults)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DebounceConfig::default();
        assert_eq!(config.window_secs, 900);
        assert_eq!(config.cooldown_secs, 3600);
        assert_eq!(config.max_alerts_per_window, 3);
        assert_eq!(config.escalation_delay_secs, 3600);
    }

    #[test]
    fn test_per_kind_override() {
        let mut config = AlertsConfig::default();
        config.kinds.insert(
            AlertKind::FailureRate,
            DebounceConfig {
                window_secs: 60,
                ..DebounceConfig::default()
            },
        );

        assert_eq!(config.for_kind(AlertKind::FailureRate).window_secs, 60);
        assert_eq!(config.for_kind(AlertKind::QueueBacklog).window_secs, 900);
    }
}
