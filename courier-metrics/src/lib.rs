//! OpenTelemetry metrics for the courier delivery engine
//!
//! Exports metrics via OTLP to an OpenTelemetry Collector, which can expose
//! them in Prometheus format for scraping. When the exporter is disabled,
//! instruments still record into the default no-op meter, so callers never
//! branch on whether metrics are enabled.
//!
//! # Architecture
//!
//! ```text
//! Courier engine → OTLP/HTTP → OpenTelemetry Collector → Prometheus (scrape)
//! ```

#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

mod alerts;
mod config;
mod delivery;
mod error;
mod exporter;

pub use alerts::AlertMetrics;
pub use config::MetricsConfig;
pub use delivery::{CircuitMetrics, DeliveryMetrics};
pub use error::MetricsError;
use once_cell::sync::OnceCell;

/// Global metrics instance
static METRICS_INSTANCE: OnceCell<Metrics> = OnceCell::new();

/// Root metrics container
#[derive(Debug)]
pub struct Metrics {
    pub delivery: DeliveryMetrics,
    pub circuit: CircuitMetrics,
    pub alerts: AlertMetrics,
}

/// Initialize the metrics system
///
/// Must be called once at startup before any metrics are recorded. When the
/// config disables metrics the OTLP exporter is skipped, but instruments are
/// still created against the no-op global meter.
///
/// # Errors
///
/// Returns an error if exporter initialization fails or if called twice.
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if config.enabled {
        let provider = exporter::init_otlp_exporter(&config.endpoint)?;
        opentelemetry::global::set_meter_provider(provider);
    }

    let metrics = Metrics {
        delivery: DeliveryMetrics::new(),
        circuit: CircuitMetrics::new(),
        alerts: AlertMetrics::new(),
    };

    METRICS_INSTANCE
        .set(metrics)
        .map_err(|_| MetricsError::AlreadyInitialized)
}

/// Get the global metrics instance, if initialized
pub fn metrics() -> Option<&'static Metrics> {
    METRICS_INSTANCE.get()
}
