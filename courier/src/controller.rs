//! Engine controller
//!
//! Assembles the store, health tracker, processor, queue manager and alert
//! engine under a single broadcast shutdown signal. The assembled
//! [`Engine`] hands out the coordinator for embedding surfaces (the API
//! facade, tests) and runs the long-lived loops until the process is told
//! to stop.

use std::sync::{Arc, LazyLock};

use courier_alerts::{AlertEngine, AlertEvent, Channel, TracingChannel};
use courier_core::{Signal, internal, logging};
use courier_delivery::{
    AlertSink, DeliveryCoordinator, DeliveryProcessor, HandlerRegistry, HealthTracker,
    QueueManager, ThresholdEvent,
};
use courier_store::{MemoryStore, Store};
use tokio::sync::{broadcast, mpsc};

use crate::config::{CourierConfig, FeatureFlags};

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

/// Forwards threshold events from the delivery crate into the async alert
/// pipeline without blocking the producers
struct ChannelSink(mpsc::UnboundedSender<ThresholdEvent>);

impl AlertSink for ChannelSink {
    fn raise(&self, event: ThresholdEvent) {
        // A closed pipeline only loses the event
        let _ = self.0.send(event);
    }
}

fn to_alert_event(event: ThresholdEvent) -> AlertEvent {
    let mut details = serde_json::Map::new();
    details.insert("observed".to_string(), event.observed.into());
    details.insert("threshold".to_string(), event.threshold.into());
    details.insert(
        "threshold_severity".to_string(),
        event.severity.as_str().into(),
    );
    AlertEvent {
        kind: event.kind,
        organization: event.organization,
        destination: event.destination,
        message: event.message,
        details,
    }
}

/// Builder for the assembled engine
pub struct Courier {
    config: CourierConfig,
    registry: Arc<HandlerRegistry>,
}

impl Courier {
    /// Start assembling from configuration, with an empty handler registry
    #[must_use]
    pub fn new(config: CourierConfig) -> Self {
        Self {
            config,
            registry: Arc::new(HandlerRegistry::new()),
        }
    }

    /// Provide the protocol handlers this deployment dispatches with
    #[must_use]
    pub fn with_handlers(mut self, registry: HandlerRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Assemble every component over a shared store
    ///
    /// # Errors
    /// Returns an error when metrics initialization or health restoration
    /// fails.
    pub async fn build(self) -> anyhow::Result<Engine> {
        if self.config.features.metrics {
            courier_metrics::init_metrics(&self.config.metrics)?;
        }

        if self.registry.is_empty() {
            tracing::warn!(
                "No protocol handlers registered; queued entries will fail until handlers are provided"
            );
        }

        let memory = match self.config.store.capacity {
            Some(capacity) => Arc::new(MemoryStore::with_capacity(capacity)),
            None => Arc::new(MemoryStore::new()),
        };
        let store = Store {
            queue: memory.clone(),
            destinations: memory.clone(),
            health: memory.clone(),
            delivery_log: memory.clone(),
            download_links: memory.clone(),
            webhook_secrets: memory,
        };

        // Alert pipeline: sync sinks feed a channel that a drain task pumps
        // into the async engine
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let sink: Arc<dyn AlertSink> = Arc::new(ChannelSink(event_tx));

        let alerts = Arc::new(AlertEngine::new(
            self.config.alerts.clone(),
            vec![
                Arc::new(TracingChannel::new(Channel::Email)),
                Arc::new(TracingChannel::new(Channel::Chat)),
                Arc::new(TracingChannel::new(Channel::Pager)),
                Arc::new(TracingChannel::new(Channel::Phone)),
            ],
        ));

        let health = Arc::new(
            HealthTracker::new(store.health.clone(), self.config.circuit_breaker.clone())
                .with_alert_sink(sink.clone()),
        );
        let restored = health.load().await?;
        if restored > 0 {
            internal!(level = INFO, "Restored health state for {restored} destinations");
        }

        let processor = Arc::new(DeliveryProcessor::new(
            self.config.processor.clone(),
            store.queue.clone(),
            store.destinations.clone(),
            store.delivery_log.clone(),
            health.clone(),
            self.registry,
        ));

        let manager = Arc::new(
            QueueManager::new(self.config.queue_manager.clone(), store.queue.clone())
                .with_alert_sink(sink),
        );

        let coordinator = Arc::new(DeliveryCoordinator::new(
            self.config.coordinator.clone(),
            store.queue.clone(),
            store.destinations.clone(),
            store.delivery_log.clone(),
            health,
        ));

        let drain_engine = alerts.clone();
        let drain = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                drain_engine.process(to_alert_event(event)).await;
            }
        });

        Ok(Engine {
            coordinator,
            processor,
            manager,
            alerts,
            store,
            features: self.config.features,
            drain,
        })
    }

    /// Assemble and run until a shutdown signal arrives
    ///
    /// # Errors
    /// Returns an error when assembly fails; runtime component errors are
    /// contained within their serve loops.
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();
        internal!(level = INFO, "Courier starting");
        self.build().await?.run().await
    }
}

/// The assembled engine
pub struct Engine {
    coordinator: Arc<DeliveryCoordinator>,
    processor: Arc<DeliveryProcessor>,
    manager: Arc<QueueManager>,
    alerts: Arc<AlertEngine>,
    store: Store,
    features: FeatureFlags,
    drain: tokio::task::JoinHandle<()>,
}

impl Engine {
    /// The delivery submission and status surface
    #[must_use]
    pub fn coordinator(&self) -> Arc<DeliveryCoordinator> {
        self.coordinator.clone()
    }

    /// The scheduler, for operational control (pause, cancel, process-once)
    #[must_use]
    pub fn processor(&self) -> Arc<DeliveryProcessor> {
        self.processor.clone()
    }

    /// The alerting pipeline, for maintenance windows and resolution
    #[must_use]
    pub fn alerts(&self) -> Arc<AlertEngine> {
        self.alerts.clone()
    }

    /// The composed store facade
    #[must_use]
    pub const fn store(&self) -> &Store {
        &self.store
    }

    /// Run the long-lived loops until a shutdown signal arrives
    ///
    /// # Errors
    /// Runtime component errors are contained within their serve loops;
    /// this returns an error only when a loop exits abnormally.
    pub async fn run(self) -> anyhow::Result<()> {
        internal!(level = INFO, "Courier running");

        let result = if self.features.scheduler {
            tokio::select! {
                r = self.processor.serve(SHUTDOWN_BROADCAST.subscribe()) => r.map_err(Into::into),
                r = self.manager.serve(SHUTDOWN_BROADCAST.subscribe()) => r.map_err(Into::into),
                r = self.alerts.serve(SHUTDOWN_BROADCAST.subscribe()) => r.map_err(Into::into),
                r = shutdown() => r,
            }
        } else {
            tokio::select! {
                r = self.alerts.serve(SHUTDOWN_BROADCAST.subscribe()) => r.map_err(Into::into),
                r = shutdown() => r,
            }
        };

        self.drain.abort();
        internal!(level = INFO, "Courier stopped");
        result
    }
}

/// Wait for an interrupt, then broadcast shutdown to every component
///
/// After broadcasting, this keeps waiting so the component serve loops win
/// the select and finish their drains; a second interrupt forces exit.
async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered -- enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate signal received, shutting down");
        }
    }

    let mut receiver = SHUTDOWN_BROADCAST.subscribe();

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    loop {
        tokio::select! {
            sig = receiver.recv() => {
                match sig {
                    Ok(signal) => tracing::debug!("Received {signal:?}"),
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(error) => tracing::debug!("Received: {error:?}"),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    Ok(())
}
