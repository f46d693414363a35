//! Alerting pipeline for the courier delivery engine
//!
//! Turns the raw stream of threshold events from the queue manager and the
//! health tracker into a bounded, deduplicated notification stream:
//! per-key debouncing with rolling windows and cooldowns, a severity
//! escalation ladder, timezone-aware maintenance windows, and pluggable
//! notification channels.

#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod channel;
pub mod config;
pub mod debounce;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod maintenance;

pub use channel::{Notification, NotificationChannel, TracingChannel};
pub use config::{AlertsConfig, DebounceConfig};
pub use debounce::{DebounceKey, Debouncer, Decision, DropReason};
pub use engine::{AlertEngine, AlertEvent};
pub use error::AlertError;
pub use escalation::{Channel, Severity, TOP_LEVEL, channels_for_level, severity_for_level};
pub use maintenance::{MaintenanceCalendar, MaintenanceWindow, MaintenanceWindowId};
