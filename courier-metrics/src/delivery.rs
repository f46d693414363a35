//! Delivery and circuit-breaker metrics
//!
//! Tracks outbound dispatch including:
//! - Delivery attempts by outcome and destination kind
//! - Dispatch durations and payload sizes
//! - Queue sizes by status
//! - Retry distributions and oldest-pending age
//! - Circuit breaker transitions and trips

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use opentelemetry::{
    KeyValue,
    metrics::{Counter, Histogram, Meter},
};

/// Delivery metrics collector
#[derive(Debug)]
pub struct DeliveryMetrics {
    /// Total number of delivery attempts by outcome and destination kind
    attempts_total: Counter<u64>,

    /// Distribution of dispatch durations by destination kind
    duration_seconds: Histogram<f64>,

    /// Distribution of payload sizes accepted by the coordinator
    payload_bytes: Histogram<u64>,

    /// Distribution of retry counts before a terminal outcome
    retry_count: Histogram<u64>,

    // Fast atomic counters for the hot path (read by observable gauges)
    queue_pending: Arc<AtomicU64>,
    queue_processing: Arc<AtomicU64>,
    queue_completed: Arc<AtomicU64>,
    queue_failed: Arc<AtomicU64>,
    queue_cancelled: Arc<AtomicU64>,
    oldest_pending_seconds: Arc<AtomicU64>,
}

impl DeliveryMetrics {
    /// Create a new delivery metrics collector
    #[must_use]
    pub fn new() -> Self {
        let meter = meter();

        let attempts_total = meter
            .u64_counter("courier.delivery.attempts.total")
            .with_description("Total number of delivery attempts by outcome and destination kind")
            .build();

        let duration_seconds = meter
            .f64_histogram("courier.delivery.duration.seconds")
            .with_description("Distribution of dispatch durations by destination kind")
            .build();

        let payload_bytes = meter
            .u64_histogram("courier.delivery.payload.bytes")
            .with_description("Distribution of accepted payload sizes")
            .build();

        let retry_count = meter
            .u64_histogram("courier.delivery.retry.count")
            .with_description("Distribution of retry counts before a terminal outcome")
            .build();

        let queue_pending = Arc::new(AtomicU64::new(0));
        let queue_processing = Arc::new(AtomicU64::new(0));
        let queue_completed = Arc::new(AtomicU64::new(0));
        let queue_failed = Arc::new(AtomicU64::new(0));
        let queue_cancelled = Arc::new(AtomicU64::new(0));

        // Observable gauge reads the atomics; the meter keeps the callback alive
        let pending = queue_pending.clone();
        let processing = queue_processing.clone();
        let completed = queue_completed.clone();
        let failed = queue_failed.clone();
        let cancelled = queue_cancelled.clone();
        meter
            .u64_observable_gauge("courier.queue.size")
            .with_description("Current queue size by status")
            .with_callback(move |observer| {
                observer.observe(
                    pending.load(Ordering::Relaxed),
                    &[KeyValue::new("status", "pending")],
                );
                observer.observe(
                    processing.load(Ordering::Relaxed),
                    &[KeyValue::new("status", "processing")],
                );
                observer.observe(
                    completed.load(Ordering::Relaxed),
                    &[KeyValue::new("status", "completed")],
                );
                observer.observe(
                    failed.load(Ordering::Relaxed),
                    &[KeyValue::new("status", "failed")],
                );
                observer.observe(
                    cancelled.load(Ordering::Relaxed),
                    &[KeyValue::new("status", "cancelled")],
                );
            })
            .build();

        let oldest_pending_seconds = Arc::new(AtomicU64::new(0));
        let oldest = oldest_pending_seconds.clone();
        meter
            .u64_observable_gauge("courier.queue.oldest.seconds")
            .with_description("Age of the oldest pending entry in the queue")
            .with_callback(move |observer| {
                observer.observe(oldest.load(Ordering::Relaxed), &[]);
            })
            .build();

        Self {
            attempts_total,
            duration_seconds,
            payload_bytes,
            retry_count,
            queue_pending,
            queue_processing,
            queue_completed,
            queue_failed,
            queue_cancelled,
            oldest_pending_seconds,
        }
    }

    /// Record a delivery attempt outcome
    pub fn record_attempt(&self, organization: &str, kind: &str, success: bool, duration_secs: f64) {
        let attributes = [
            KeyValue::new("organization", organization.to_string()),
            KeyValue::new("kind", kind.to_string()),
            KeyValue::new("outcome", if success { "success" } else { "failure" }),
        ];
        self.attempts_total.add(1, &attributes);
        self.duration_seconds.record(
            duration_secs,
            &[KeyValue::new("kind", kind.to_string())],
        );
    }

    /// Record an accepted payload size
    pub fn record_payload_size(&self, bytes: u64) {
        self.payload_bytes.record(bytes, &[]);
    }

    /// Record a retry being scheduled
    pub fn record_retry(&self, kind: &str, attempt: u64) {
        self.attempts_total.add(
            1,
            &[
                KeyValue::new("kind", kind.to_string()),
                KeyValue::new("outcome", "retry"),
            ],
        );
        self.retry_count.record(attempt, &[]);
    }

    /// Set absolute queue size for a specific status
    pub fn set_queue_size(&self, status: &str, size: u64) {
        let counter = match status {
            "pending" => &self.queue_pending,
            "processing" => &self.queue_processing,
            "completed" => &self.queue_completed,
            "failed" => &self.queue_failed,
            "cancelled" => &self.queue_cancelled,
            _ => return,
        };
        counter.store(size, Ordering::Relaxed);
    }

    /// Update the age of the oldest pending entry
    pub fn update_oldest_pending_age(&self, age_secs: u64) {
        self.oldest_pending_seconds.store(age_secs, Ordering::Relaxed);
    }
}

impl Default for DeliveryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Circuit breaker metrics collector
#[derive(Debug)]
pub struct CircuitMetrics {
    /// Circuit state transitions by destination and target state
    transitions_total: Counter<u64>,

    /// Circuit trips (transitions into open)
    trips_total: Counter<u64>,
}

impl CircuitMetrics {
    /// Create a new circuit metrics collector
    #[must_use]
    pub fn new() -> Self {
        let meter = meter();

        let transitions_total = meter
            .u64_counter("courier.circuit.transitions.total")
            .with_description("Circuit breaker state transitions by destination and target state")
            .build();

        let trips_total = meter
            .u64_counter("courier.circuit.trips.total")
            .with_description("Circuit breaker trips (transitions into open)")
            .build();

        Self {
            transitions_total,
            trips_total,
        }
    }

    /// Record a state change
    pub fn record_transition(&self, destination: &str, to_state: &str) {
        self.transitions_total.add(
            1,
            &[
                KeyValue::new("destination", destination.to_string()),
                KeyValue::new("state", to_state.to_string()),
            ],
        );
        if to_state == "open" {
            self.trips_total
                .add(1, &[KeyValue::new("destination", destination.to_string())]);
        }
    }
}

impl Default for CircuitMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Get the OpenTelemetry meter for delivery metrics
fn meter() -> Meter {
    opentelemetry::global::meter("courier.delivery")
}
