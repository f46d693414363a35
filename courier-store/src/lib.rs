//! Persistence ports for the courier delivery engine
//!
//! Each persistence concern is a narrow port; the `Store` facade composes
//! them for wiring convenience. Components depend only on the port they
//! need: the scheduler sees `QueueStore`, the health tracker sees
//! `HealthStore`, and so on. `MemoryStore` implements every port and backs
//! the test suites; production deployments substitute a database-backed
//! implementation per port.

#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod error;
pub mod memory;
pub mod ports;

use std::sync::Arc;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use ports::{
    DeliveryLogStore, DestinationStore, DownloadLinkStore, HealthStore, QueueStats, QueueStore,
    StatusFilter, WebhookSecretStore,
};

/// Facade composing the narrow persistence ports
///
/// Holds one handle per port so a single backend (or a mix of backends)
/// can be wired through the whole engine in one place.
#[derive(Clone)]
pub struct Store {
    pub queue: Arc<dyn QueueStore>,
    pub destinations: Arc<dyn DestinationStore>,
    pub health: Arc<dyn HealthStore>,
    pub delivery_log: Arc<dyn DeliveryLogStore>,
    pub download_links: Arc<dyn DownloadLinkStore>,
    pub webhook_secrets: Arc<dyn WebhookSecretStore>,
}

impl Store {
    /// Build a facade where every port is served by the same in-memory store
    #[must_use]
    pub fn in_memory() -> Self {
        let memory = Arc::new(MemoryStore::new());
        Self {
            queue: memory.clone(),
            destinations: memory.clone(),
            health: memory.clone(),
            delivery_log: memory.clone(),
            download_links: memory.clone(),
            webhook_secrets: memory,
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}
