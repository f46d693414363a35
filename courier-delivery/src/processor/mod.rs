//! Delivery processor orchestration
//!
//! The processor is the bounded-concurrency consumer of the queue. A single
//! driver loop ticks on an interval; each tick claims as many due entries
//! as it has free slots and hands every entry to an independent worker
//! task. Workers form a recovery boundary: no handler error ever reaches
//! the driver.

pub mod worker;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use chrono::Utc;
use courier_core::{DeliveryId, EntryId, Signal, internal};
use courier_store::{DeliveryLogStore, DestinationStore, QueueStats, QueueStore};
use dashmap::DashMap;
use serde::Deserialize;

use crate::{
    error::DeliveryError, handler::HandlerRegistry, health::HealthTracker, retry::RetryPolicy,
};

const fn default_max_concurrent_deliveries() -> usize {
    10
}

const fn default_processing_interval_secs() -> u64 {
    5
}

const fn default_stuck_timeout_secs() -> u64 {
    300 // 5 minutes
}

const fn default_drain_timeout_secs() -> u64 {
    30
}

/// Configuration for the delivery processor
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorConfig {
    /// Maximum number of worker tasks in flight at once
    ///
    /// Default: 10
    #[serde(default = "default_max_concurrent_deliveries")]
    pub max_concurrent_deliveries: usize,

    /// How often the driver loop ticks (in seconds)
    ///
    /// Default: 5 seconds
    #[serde(default = "default_processing_interval_secs")]
    pub processing_interval_secs: u64,

    /// How long an entry may sit in `processing` before it is considered
    /// stuck and returned to `pending` (in seconds)
    ///
    /// Default: 300 seconds
    #[serde(default = "default_stuck_timeout_secs")]
    pub stuck_timeout_secs: u64,

    /// How long `stop()` waits for in-flight workers to drain (in seconds)
    ///
    /// Default: 30 seconds
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,

    /// Retry backoff parameters
    #[serde(flatten, default)]
    pub retry: RetryPolicy,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_deliveries: default_max_concurrent_deliveries(),
            processing_interval_secs: default_processing_interval_secs(),
            stuck_timeout_secs: default_stuck_timeout_secs(),
            drain_timeout_secs: default_drain_timeout_secs(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Everything a worker task needs, shared by reference
pub(crate) struct WorkerContext {
    pub queue: Arc<dyn QueueStore>,
    pub destinations: Arc<dyn DestinationStore>,
    pub delivery_log: Arc<dyn DeliveryLogStore>,
    pub health: Arc<HealthTracker>,
    pub registry: Arc<HandlerRegistry>,
    pub retry: RetryPolicy,
}

/// Bounded-concurrency consumer of the delivery queue
pub struct DeliveryProcessor {
    config: ProcessorConfig,
    ctx: Arc<WorkerContext>,
    in_flight: Arc<DashMap<EntryId, ()>>,
    paused: Arc<AtomicBool>,
}

impl std::fmt::Debug for DeliveryProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryProcessor")
            .field("config", &self.config)
            .field("in_flight", &self.in_flight.len())
            .field("paused", &self.paused.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl DeliveryProcessor {
    /// Create a processor over the given ports
    #[must_use]
    pub fn new(
        config: ProcessorConfig,
        queue: Arc<dyn QueueStore>,
        destinations: Arc<dyn DestinationStore>,
        delivery_log: Arc<dyn DeliveryLogStore>,
        health: Arc<HealthTracker>,
        registry: Arc<HandlerRegistry>,
    ) -> Self {
        let retry = config.retry.clone();
        Self {
            config,
            ctx: Arc::new(WorkerContext {
                queue,
                destinations,
                delivery_log,
                health,
                registry,
                retry,
            }),
            in_flight: Arc::new(DashMap::new()),
            paused: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stop claiming new entries; in-flight workers finish normally
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        internal!(level = INFO, "Delivery processor paused");
    }

    /// Resume claiming entries
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        internal!(level = INFO, "Delivery processor resumed");
    }

    /// Whether the driver loop is currently skipping ticks
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Number of worker tasks currently in flight
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// The queue port this processor consumes, for control surfaces
    #[must_use]
    pub fn queue_store(&self) -> Arc<dyn QueueStore> {
        self.ctx.queue.clone()
    }

    /// Current queue counters
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    pub async fn queue_status(&self) -> Result<QueueStats, DeliveryError> {
        Ok(self.ctx.queue.queue_stats().await?)
    }

    /// Cancel every pending entry of a delivery
    ///
    /// Entries already `processing` are allowed to complete; there is no
    /// forcible interrupt. Returns how many entries were cancelled.
    ///
    /// # Errors
    /// Returns an error if the store cannot be updated.
    pub async fn cancel_delivery(&self, delivery_id: DeliveryId) -> Result<usize, DeliveryError> {
        let cancelled = self.ctx.queue.cancel_by_delivery(delivery_id).await?;
        if cancelled > 0 {
            tracing::info!(
                delivery_id = %delivery_id,
                cancelled = cancelled,
                "Cancelled pending entries for delivery"
            );
        }
        Ok(cancelled)
    }

    /// Run one driver tick synchronously, awaiting every spawned worker
    ///
    /// Used by tests and operational tooling; the background loop uses the
    /// same claim path but detaches the workers.
    ///
    /// # Errors
    /// Returns an error if the dequeue itself fails. Worker errors never
    /// propagate.
    pub async fn process_once(&self) -> Result<usize, DeliveryError> {
        let claimed = self.claim().await?;
        let count = claimed.len();

        let mut tasks = Vec::with_capacity(count);
        for entry in claimed {
            tasks.push(self.spawn_worker(entry));
        }
        for task in tasks {
            // A worker that panics only loses its own entry; the stuck
            // sweep returns it to pending later
            if let Err(error) = task.await {
                tracing::error!(error = %error, "Worker task panicked");
            }
        }
        Ok(count)
    }

    /// Run the delivery processor until a shutdown signal arrives
    ///
    /// On shutdown the driver stops claiming and waits up to the configured
    /// drain timeout for in-flight workers. Workers that outlive the drain
    /// are recovered by the stuck sweep on the next start.
    ///
    /// # Errors
    /// Returns an error only for unrecoverable initialization failures;
    /// per-tick dequeue errors are logged and the loop stays alive.
    pub async fn serve(
        self: Arc<Self>,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), DeliveryError> {
        internal!(level = INFO, "Delivery processor starting");

        // Recover entries stranded in processing by a previous run
        let cutoff = Utc::now()
            - chrono::Duration::seconds(
                i64::try_from(self.config.stuck_timeout_secs).unwrap_or(i64::MAX),
            );
        match self.ctx.queue.reset_stuck(cutoff).await {
            Ok(reset) if reset > 0 => {
                tracing::info!(reset = reset, "Recovered stuck entries at startup");
            }
            Ok(_) => {}
            Err(error) => {
                tracing::error!(error = %error, "Startup stuck-entry recovery failed");
            }
        }

        let mut tick = tokio::time::interval(Duration::from_secs(
            self.config.processing_interval_secs.max(1),
        ));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // Skip the immediate first tick
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if self.paused.load(Ordering::SeqCst) {
                        continue;
                    }
                    match self.claim().await {
                        Ok(claimed) => {
                            for entry in claimed {
                                drop(self.spawn_worker(entry));
                            }
                        }
                        Err(error) => {
                            // Dequeue errors pause this tick only
                            tracing::error!(error = %error, "Dequeue failed, skipping tick");
                        }
                    }
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!(level = INFO, "Delivery processor received shutdown signal");
                            self.drain().await;
                            internal!(level = INFO, "Delivery processor shutdown complete");
                            break;
                        }
                        Err(error) => {
                            tracing::error!(error = %error, "Shutdown channel error");
                            self.drain().await;
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Claim up to `slots` due entries, registering them in flight
    async fn claim(&self) -> Result<Vec<courier_core::QueueEntry>, DeliveryError> {
        let slots = self
            .config
            .max_concurrent_deliveries
            .saturating_sub(self.in_flight.len());
        if slots == 0 {
            return Ok(Vec::new());
        }

        let claimed = self.ctx.queue.dequeue(slots).await?;
        for entry in &claimed {
            self.in_flight.insert(entry.id, ());
        }
        Ok(claimed)
    }

    fn spawn_worker(&self, entry: courier_core::QueueEntry) -> tokio::task::JoinHandle<()> {
        let ctx = self.ctx.clone();
        let in_flight = self.in_flight.clone();
        tokio::spawn(async move {
            let id = entry.id;
            worker::process_entry(&ctx, entry).await;
            in_flight.remove(&id);
        })
    }

    /// Wait for the in-flight set to empty, bounded by the drain timeout
    async fn drain(&self) {
        let deadline = std::time::Instant::now()
            + Duration::from_secs(self.config.drain_timeout_secs);

        while !self.in_flight.is_empty() {
            if std::time::Instant::now() >= deadline {
                tracing::warn!(
                    remaining = self.in_flight.len(),
                    "Drain timeout exceeded; remaining workers will be recovered as stuck entries"
                );
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        internal!(level = INFO, "All in-flight deliveries completed");
    }
}
