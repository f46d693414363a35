//! Error types for metrics initialization

use thiserror::Error;

/// Errors raised while setting up the metrics system
#[derive(Debug, Error)]
pub enum MetricsError {
    /// The OpenTelemetry SDK reported a failure
    #[error("OpenTelemetry error: {0}")]
    OpenTelemetry(String),

    /// `init_metrics` was called more than once
    #[error("metrics system already initialized")]
    AlreadyInitialized,
}
