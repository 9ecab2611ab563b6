//! Shared coordinator state

use std::sync::Arc;

use tokio::sync::Notify;

use crate::broker::{Broker, ChannelBroker};
use crate::locks::KeyLocks;
use crate::repository::{KvStore, MemoryStore};
use crate::service::registry::BuilderRegistry;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn KvStore>,
    pub events: Arc<ChannelBroker>,
    pub builders: Arc<BuilderRegistry>,
    pub locks: Arc<KeyLocks>,

    /// Wakes the dispatch loop when a build or a builder becomes available
    pub wake: Arc<Notify>,
}

impl AppState {
    pub fn new(store: Arc<dyn KvStore>, event_buffer: usize) -> Self {
        Self {
            store,
            events: Arc::new(ChannelBroker::new(event_buffer)),
            builders: Arc::new(BuilderRegistry::new()),
            locks: Arc::new(KeyLocks::new()),
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), 1024)
    }

    pub fn store(&self) -> &dyn KvStore {
        self.store.as_ref()
    }

    pub fn broker(&self) -> &dyn Broker {
        self.events.as_ref()
    }
}
