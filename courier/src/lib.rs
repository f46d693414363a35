//! Courier: a multi-destination delivery engine
//!
//! Accepts requests to deliver a payload to one or more configured
//! destinations and is responsible for durable enqueue, priority-ordered
//! scheduling, bounded-concurrency dispatch, protected retry,
//! circuit-breaking per destination, health tracking, and debounced
//! alerting on systemic failure.
//!
//! This crate assembles the engine: layered configuration and the
//! controller that runs the scheduler, queue manager and alert engine
//! under one shutdown signal. The pieces live in their own crates:
//!
//! - `courier-core`: the shared domain model
//! - `courier-store`: persistence ports and the in-memory store
//! - `courier-delivery`: scheduler, retry policy, circuit breaker,
//!   health tracker, coordinator
//! - `courier-alerts`: debouncing, escalation, maintenance windows
//! - `courier-metrics`: OpenTelemetry instruments

#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod controller;

pub use config::{ConfigError, CourierConfig, Profile};
pub use controller::{Courier, Engine};
