//! Retry backoff policy for delivery operations.
//!
//! The policy owns the timing side of retries: how long to wait before the
//! n-th attempt, with exponential growth, a cap, and mandatory jitter in
//! production. Whether an error is retryable at all is decided by its
//! classification ([`crate::error::DeliveryError::is_retryable`]), and the
//! retry budget travels with each queue entry (`QueueEntry::max_retries`),
//! stamped once at acceptance; this module never holds a second copy of
//! either.
//!
//! All retry decisions are made at the scheduler, never inside handlers.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry backoff configuration for delivery operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Base delay for exponential backoff (in seconds).
    ///
    /// The delay for the n-th retry is `base * multiplier^(n - 1)`.
    ///
    /// Default: 1 second
    #[serde(default = "defaults::base_delay_secs")]
    pub base_delay_secs: u64,

    /// Backoff multiplier.
    ///
    /// Default: 2.0
    #[serde(default = "defaults::multiplier")]
    pub multiplier: f64,

    /// Maximum retry delay (in seconds).
    ///
    /// Caps the exponential backoff to prevent excessively long delays.
    ///
    /// Default: 300 seconds (5 minutes)
    #[serde(default = "defaults::max_delay_secs")]
    pub max_delay_secs: u64,

    /// Jitter factor for randomizing retry delays.
    ///
    /// Jitter prevents retry stampedes when many entries fail together.
    /// The delay is randomized within ±`jitter_factor`. The production
    /// profile requires this to be non-zero.
    ///
    /// Default: 0.1 (±10%)
    #[serde(default = "defaults::jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_secs: defaults::base_delay_secs(),
            multiplier: defaults::multiplier(),
            max_delay_secs: defaults::max_delay_secs(),
            jitter_factor: defaults::jitter_factor(),
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Backoff duration before the n-th retry (1-indexed), without jitter.
    #[must_use]
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1);
        let delay_secs = if exponent >= 63 {
            self.max_delay_secs
        } else {
            #[allow(
                clippy::cast_precision_loss,
                clippy::cast_possible_truncation,
                clippy::cast_possible_wrap,
                clippy::cast_sign_loss
            )]
            let scaled = (self.base_delay_secs as f64 * self.multiplier.powi(exponent as i32))
                .min(self.max_delay_secs as f64)
                .max(0.0) as u64;
            scaled
        };
        Duration::from_secs(delay_secs)
    }

    /// Calculate when the n-th retry (1-indexed) should occur.
    ///
    /// Applies the configured jitter on top of [`Self::backoff_for`].
    #[must_use]
    pub fn next_retry_at(&self, retry: u32) -> DateTime<Utc> {
        let jittered = apply_jitter(self.backoff_for(retry), self.jitter_factor);
        Utc::now()
            + chrono::Duration::from_std(jittered).unwrap_or_else(|_| chrono::Duration::seconds(
                i64::try_from(self.max_delay_secs).unwrap_or(i64::MAX),
            ))
    }
}

mod defaults {
    pub const fn base_delay_secs() -> u64 {
        1
    }

    pub const fn multiplier() -> f64 {
        2.0
    }

    pub const fn max_delay_secs() -> u64 {
        300 // 5 minutes
    }

    pub const fn jitter_factor() -> f64 {
        0.1 // ±10%
    }
}

/// Apply multiplicative jitter: `delay * (1 ± factor)`
fn apply_jitter(delay: Duration, factor: f64) -> Duration {
    if factor <= 0.0 {
        return delay;
    }

    let base = delay.as_secs_f64();
    let jitter_range = base * factor;
    let mut rng = rand::rng();
    let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
    Duration::from_secs_f64((base + jitter).max(0.0))
}
