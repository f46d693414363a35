//! Delivery pipeline for the courier engine
//!
//! This crate is the dispatch core: the bounded-concurrency scheduler that
//! consumes the durable queue, the retry policy that turns failures into
//! backoff data, the per-destination circuit breaker and health tracker,
//! the queue manager that samples and repairs the queue, and the
//! coordinator that fans delivery requests out into queue entries.

#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod circuit_breaker;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod handler;
pub mod health;
pub mod manager;
pub mod processor;
pub mod retry;
pub mod service;
pub mod types;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot};
pub use coordinator::{CoordinatorConfig, DeliveryCoordinator};
pub use error::{CoordinatorError, DeliveryError, ErrorKind, ValidationError};
pub use events::{AlertKind, AlertSink, NullAlertSink, ThresholdEvent, ThresholdSeverity};
pub use handler::{
    ConfigValidation, ConnectionTest, DeliveryHandler, HandlerPayload, HandlerRegistry,
    HandlerSuccess,
};
pub use health::HealthTracker;
pub use manager::{QueueManager, QueueManagerConfig, QueueSample, QueueThresholds};
pub use processor::{DeliveryProcessor, ProcessorConfig};
pub use retry::RetryPolicy;
pub use service::QueueQueryService;
pub use types::{
    AcceptStatus, DeliveryOptions, DeliveryRequest, DeliveryResponse, DeliveryStatusView,
    DestinationAccept, DestinationSelector, DestinationStatusView, RequestPayload,
};
