//! Metrics configuration

use serde::{Deserialize, Serialize};

/// Configuration for the metrics system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether to export metrics via OTLP
    #[serde(default)]
    pub enabled: bool,

    /// OTLP/HTTP endpoint of the collector
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_endpoint(),
        }
    }
}

fn default_endpoint() -> String {
    "http://localhost:4318".to_string()
}
