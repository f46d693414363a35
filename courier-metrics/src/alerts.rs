//! Alerting metrics

use opentelemetry::{
    KeyValue,
    metrics::{Counter, Meter},
};

/// Alert pipeline metrics collector
#[derive(Debug)]
pub struct AlertMetrics {
    /// Alerts emitted after debouncing, by kind and severity
    generated_total: Counter<u64>,

    /// Alerts dropped by the debouncer, by kind and drop reason
    suppressed_total: Counter<u64>,

    /// Alerts marked resolved by operators
    resolved_total: Counter<u64>,
}

impl AlertMetrics {
    /// Create a new alert metrics collector
    #[must_use]
    pub fn new() -> Self {
        let meter = meter();

        let generated_total = meter
            .u64_counter("courier.alerts.generated.total")
            .with_description("Alerts emitted after debouncing, by kind and severity")
            .build();

        let suppressed_total = meter
            .u64_counter("courier.alerts.suppressed.total")
            .with_description("Alerts dropped by the debouncer, by kind and reason")
            .build();

        let resolved_total = meter
            .u64_counter("courier.alerts.resolved.total")
            .with_description("Alerts marked resolved by operators")
            .build();

        Self {
            generated_total,
            suppressed_total,
            resolved_total,
        }
    }

    /// Record an alert allowed through the debouncer
    pub fn record_generated(&self, kind: &str, severity: &str) {
        self.generated_total.add(
            1,
            &[
                KeyValue::new("kind", kind.to_string()),
                KeyValue::new("severity", severity.to_string()),
            ],
        );
    }

    /// Record an alert dropped by the debouncer
    pub fn record_suppressed(&self, kind: &str, reason: &str) {
        self.suppressed_total.add(
            1,
            &[
                KeyValue::new("kind", kind.to_string()),
                KeyValue::new("reason", reason.to_string()),
            ],
        );
    }

    /// Record an operator resolution
    pub fn record_resolved(&self, kind: &str) {
        self.resolved_total
            .add(1, &[KeyValue::new("kind", kind.to_string())]);
    }
}

impl Default for AlertMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Get the OpenTelemetry meter for alert metrics
fn meter() -> Meter {
    opentelemetry::global::meter("courier.alerts")
}
