//! Queue manager
//!
//! Housekeeping beside the processor: periodic metrics sampling, retention
//! cleanup of terminal entries, the stuck-item sweep, and threshold
//! alerting. The manager never dispatches; it only observes and repairs the
//! queue.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use courier_core::{EntryStatus, OrganizationId, Signal, internal};
use courier_store::{QueueStats, QueueStore};
use serde::Deserialize;

use crate::{
    error::DeliveryError,
    events::{AlertKind, AlertSink, NullAlertSink, ThresholdEvent, ThresholdSeverity},
};

const fn default_sample_interval_secs() -> u64 {
    30
}

const fn default_cleanup_interval_secs() -> u64 {
    3600 // hourly
}

const fn default_stuck_sweep_interval_secs() -> u64 {
    60
}

const fn default_completed_retention_secs() -> u64 {
    86_400 // 24 hours
}

const fn default_failed_retention_secs() -> u64 {
    604_800 // 7 days
}

const fn default_cancelled_retention_secs() -> u64 {
    86_400 // 24 hours
}

const fn default_stuck_timeout_secs() -> u64 {
    300 // 5 minutes
}

const fn default_queue_depth_threshold() -> usize {
    1000
}

const fn default_oldest_age_threshold_secs() -> u64 {
    600 // 10 minutes
}

const fn default_processing_time_threshold_ms() -> u64 {
    30_000
}

const fn default_failure_rate_threshold_pct() -> f64 {
    10.0
}

/// Alerting thresholds checked on every sample
#[derive(Debug, Clone, Deserialize)]
pub struct QueueThresholds {
    /// Non-terminal entries before a backlog alert
    #[serde(default = "default_queue_depth_threshold")]
    pub queue_depth: usize,

    /// Age of the oldest pending entry before a backlog alert (seconds)
    #[serde(default = "default_oldest_age_threshold_secs")]
    pub oldest_age_secs: u64,

    /// Average processing time before a latency alert (milliseconds)
    #[serde(default = "default_processing_time_threshold_ms")]
    pub processing_time_ms: u64,

    /// Failure percentage over the sampling window before a rate alert
    #[serde(default = "default_failure_rate_threshold_pct")]
    pub failure_rate_pct: f64,
}

impl Default for QueueThresholds {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth_threshold(),
            oldest_age_secs: default_oldest_age_threshold_secs(),
            processing_time_ms: default_processing_time_threshold_ms(),
            failure_rate_pct: default_failure_rate_threshold_pct(),
        }
    }
}

/// Configuration for the queue manager
#[derive(Debug, Clone, Deserialize)]
pub struct QueueManagerConfig {
    /// How often metrics are sampled (seconds)
    #[serde(default = "default_sample_interval_secs")]
    pub sample_interval_secs: u64,

    /// How often terminal entries are swept by retention (seconds)
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// How often the stuck sweep runs (seconds)
    #[serde(default = "default_stuck_sweep_interval_secs")]
    pub stuck_sweep_interval_secs: u64,

    /// Retention for completed entries (seconds)
    #[serde(default = "default_completed_retention_secs")]
    pub completed_retention_secs: u64,

    /// Retention for failed entries (seconds)
    #[serde(default = "default_failed_retention_secs")]
    pub failed_retention_secs: u64,

    /// Retention for cancelled entries (seconds)
    #[serde(default = "default_cancelled_retention_secs")]
    pub cancelled_retention_secs: u64,

    /// How long `processing` may go without an update before reset (seconds)
    #[serde(default = "default_stuck_timeout_secs")]
    pub stuck_timeout_secs: u64,

    /// Alerting thresholds
    #[serde(default)]
    pub thresholds: QueueThresholds,
}

impl Default for QueueManagerConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: default_sample_interval_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            stuck_sweep_interval_secs: default_stuck_sweep_interval_secs(),
            completed_retention_secs: default_completed_retention_secs(),
            failed_retention_secs: default_failed_retention_secs(),
            cancelled_retention_secs: default_cancelled_retention_secs(),
            stuck_timeout_secs: default_stuck_timeout_secs(),
            thresholds: QueueThresholds::default(),
        }
    }
}

/// One metrics sample over the queue
#[derive(Debug, Clone)]
pub struct QueueSample {
    pub taken_at: DateTime<Utc>,
    pub stats: QueueStats,
    /// Terminal outcomes per minute over the trailing 5/15/60 minutes
    pub rate_5m: f64,
    pub rate_15m: f64,
    pub rate_60m: f64,
    /// Mean completed-minus-created duration over recent terminal entries
    pub average_processing_ms: f64,
    /// Failed share of terminal outcomes in the trailing hour, percent
    pub failure_rate_pct: f64,
    /// Age of the oldest pending entry
    pub oldest_pending_secs: u64,
    pub depth_by_organization: HashMap<OrganizationId, usize>,
    /// Mean age of pending entries per organisation, in seconds
    pub average_wait_by_organization: HashMap<OrganizationId, f64>,
}

/// Periodic sampler, janitor and threshold watchdog for the queue
pub struct QueueManager {
    config: QueueManagerConfig,
    queue: Arc<dyn QueueStore>,
    alerts: Arc<dyn AlertSink>,
}

impl std::fmt::Debug for QueueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl QueueManager {
    #[must_use]
    pub fn new(config: QueueManagerConfig, queue: Arc<dyn QueueStore>) -> Self {
        Self {
            config,
            queue,
            alerts: Arc::new(NullAlertSink),
        }
    }

    /// Attach an alert sink for threshold events
    #[must_use]
    pub fn with_alert_sink(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = alerts;
        self
    }

    /// Take one metrics sample and raise any threshold events
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    pub async fn sample(&self) -> Result<QueueSample, DeliveryError> {
        let now = Utc::now();
        let stats = self.queue.queue_stats().await?;
        let recent = self.queue.recently_processed(500).await?;
        let depth_by_organization = self.queue.depth_by_organization().await?;

        let minutes = |m: i64| now - chrono::Duration::minutes(m);
        let terminal_at = |entry: &courier_core::QueueEntry| {
            entry.processed_at.unwrap_or(entry.updated_at)
        };

        let count_since = |cutoff: DateTime<Utc>| {
            recent
                .iter()
                .filter(|entry| terminal_at(entry) >= cutoff)
                .count()
        };

        #[allow(clippy::cast_precision_loss)]
        let rate = |count: usize, window_minutes: f64| count as f64 / window_minutes;

        let in_hour: Vec<_> = recent
            .iter()
            .filter(|entry| terminal_at(entry) >= minutes(60))
            .collect();
        let failed_in_hour = in_hour
            .iter()
            .filter(|entry| entry.status == EntryStatus::Failed)
            .count();
        #[allow(clippy::cast_precision_loss)]
        let failure_rate_pct = if in_hour.is_empty() {
            0.0
        } else {
            failed_in_hour as f64 / in_hour.len() as f64 * 100.0
        };

        let processing_durations: Vec<i64> = recent
            .iter()
            .filter(|entry| entry.status == EntryStatus::Completed)
            .map(|entry| (terminal_at(entry) - entry.created_at).num_milliseconds())
            .collect();
        #[allow(clippy::cast_precision_loss)]
        let average_processing_ms = if processing_durations.is_empty() {
            0.0
        } else {
            processing_durations.iter().sum::<i64>() as f64 / processing_durations.len() as f64
        };

        let oldest_pending_secs = self
            .queue
            .oldest_pending()
            .await?
            .map(|entry| (now - entry.scheduled_at).num_seconds().max(0))
            .map_or(0, |secs| u64::try_from(secs).unwrap_or(0));

        let pending = self
            .queue
            .find_by_status(EntryStatus::Pending, courier_store::StatusFilter::default())
            .await?;
        let mut waits: HashMap<OrganizationId, (f64, usize)> = HashMap::new();
        for entry in &pending {
            #[allow(clippy::cast_precision_loss)]
            let age = (now - entry.scheduled_at).num_seconds().max(0) as f64;
            let slot = waits.entry(entry.organization.clone()).or_insert((0.0, 0));
            slot.0 += age;
            slot.1 += 1;
        }
        #[allow(clippy::cast_precision_loss)]
        let average_wait_by_organization = waits
            .into_iter()
            .map(|(org, (total, count))| (org, total / count.max(1) as f64))
            .collect();

        let sample = QueueSample {
            taken_at: now,
            rate_5m: rate(count_since(minutes(5)), 5.0),
            rate_15m: rate(count_since(minutes(15)), 15.0),
            rate_60m: rate(count_since(minutes(60)), 60.0),
            average_processing_ms,
            failure_rate_pct,
            oldest_pending_secs,
            depth_by_organization,
            average_wait_by_organization,
            stats,
        };

        self.publish_gauges(&sample);
        self.check_thresholds(&sample);
        Ok(sample)
    }

    /// Delete terminal entries past their retention
    ///
    /// # Errors
    /// Returns an error if the store cannot be updated.
    pub async fn cleanup(&self) -> Result<usize, DeliveryError> {
        let now = Utc::now();
        let cutoff = |secs: u64| now - chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX));

        let mut removed = 0;
        removed += self
            .queue
            .delete_terminal(
                EntryStatus::Completed,
                cutoff(self.config.completed_retention_secs),
            )
            .await?;
        removed += self
            .queue
            .delete_terminal(EntryStatus::Failed, cutoff(self.config.failed_retention_secs))
            .await?;
        removed += self
            .queue
            .delete_terminal(
                EntryStatus::Cancelled,
                cutoff(self.config.cancelled_retention_secs),
            )
            .await?;

        if removed > 0 {
            tracing::info!(removed = removed, "Retention cleanup removed terminal entries");
        }
        Ok(removed)
    }

    /// Return entries stuck in `processing` to `pending`
    ///
    /// Retry counts are untouched; a stuck reset is not an attempt.
    ///
    /// # Errors
    /// Returns an error if the store cannot be updated.
    pub async fn sweep_stuck(&self) -> Result<usize, DeliveryError> {
        let cutoff = Utc::now()
            - chrono::Duration::seconds(
                i64::try_from(self.config.stuck_timeout_secs).unwrap_or(i64::MAX),
            );
        let reset = self.queue.reset_stuck(cutoff).await?;
        if reset > 0 {
            tracing::warn!(reset = reset, "Stuck sweep returned entries to pending");
        }
        Ok(reset)
    }

    /// Run sampling, cleanup and the stuck sweep until shutdown
    ///
    /// # Errors
    /// Individual tick failures are logged and the loop stays alive; this
    /// only returns after a shutdown signal.
    pub async fn serve(
        self: Arc<Self>,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), DeliveryError> {
        internal!(level = INFO, "Queue manager starting");

        let mut sample_tick =
            tokio::time::interval(Duration::from_secs(self.config.sample_interval_secs.max(1)));
        let mut cleanup_tick =
            tokio::time::interval(Duration::from_secs(self.config.cleanup_interval_secs.max(1)));
        let mut stuck_tick = tokio::time::interval(Duration::from_secs(
            self.config.stuck_sweep_interval_secs.max(1),
        ));

        // Skip the immediate first ticks
        sample_tick.tick().await;
        cleanup_tick.tick().await;
        stuck_tick.tick().await;

        loop {
            tokio::select! {
                _ = sample_tick.tick() => {
                    if let Err(error) = self.sample().await {
                        tracing::error!(error = %error, "Queue sampling failed");
                    }
                }
                _ = cleanup_tick.tick() => {
                    if let Err(error) = self.cleanup().await {
                        tracing::error!(error = %error, "Retention cleanup failed");
                    }
                }
                _ = stuck_tick.tick() => {
                    if let Err(error) = self.sweep_stuck().await {
                        tracing::error!(error = %error, "Stuck sweep failed");
                    }
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!(level = INFO, "Queue manager shutting down");
                            break;
                        }
                        Err(error) => {
                            tracing::error!(error = %error, "Queue manager shutdown channel error");
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn publish_gauges(&self, sample: &QueueSample) {
        if let Some(metrics) = courier_metrics::metrics() {
            let gauge = |status: &str, value: usize| {
                metrics
                    .delivery
                    .set_queue_size(status, value as u64);
            };
            gauge("pending", sample.stats.pending);
            gauge("processing", sample.stats.processing);
            gauge("completed", sample.stats.completed);
            gauge("failed", sample.stats.failed);
            gauge("cancelled", sample.stats.cancelled);
            metrics
                .delivery
                .update_oldest_pending_age(sample.oldest_pending_secs);
        }
    }

    /// Grade the sample against thresholds, raising one event per crossing
    fn check_thresholds(&self, sample: &QueueSample) {
        let thresholds = &self.config.thresholds;

        #[allow(clippy::cast_precision_loss)]
        let checks: [(AlertKind, f64, f64, String); 4] = [
            (
                AlertKind::QueueBacklog,
                sample.stats.depth() as f64,
                thresholds.queue_depth as f64,
                format!("queue depth {} over threshold", sample.stats.depth()),
            ),
            (
                AlertKind::QueueBacklog,
                sample.oldest_pending_secs as f64,
                thresholds.oldest_age_secs as f64,
                format!(
                    "oldest pending entry is {}s old",
                    sample.oldest_pending_secs
                ),
            ),
            (
                AlertKind::ResponseTime,
                sample.average_processing_ms,
                thresholds.processing_time_ms as f64,
                format!(
                    "average processing time {:.0}ms over threshold",
                    sample.average_processing_ms
                ),
            ),
            (
                AlertKind::FailureRate,
                sample.failure_rate_pct,
                thresholds.failure_rate_pct,
                format!("failure rate {:.1}% over threshold", sample.failure_rate_pct),
            ),
        ];

        for (kind, observed, threshold, message) in checks {
            if let Some(severity) = ThresholdSeverity::grade(observed, threshold) {
                self.alerts.raise(ThresholdEvent {
                    kind,
                    organization: None,
                    destination: None,
                    observed,
                    threshold,
                    severity,
                    message,
                });
            }
        }
    }
}
