//! Builder Registry
//!
//! Tracks every builder that has connected, its state, and the channel its
//! connection task reads outgoing messages from. The builder record outlives
//! any single connection: a reconnect rebinds the channel and resets the
//! builder to ready.

use std::collections::HashMap;
use std::sync::Arc;

use conveyor_core::domain::builder::{Builder, BuilderState};
use conveyor_core::dto::protocol::CoordinatorMessage;
use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};
use uuid::Uuid;

/// Outgoing half of a builder connection
#[derive(Debug, Clone)]
pub struct Connection {
    session: Uuid,
    sender: mpsc::UnboundedSender<CoordinatorMessage>,
}

impl Connection {
    pub fn new(sender: mpsc::UnboundedSender<CoordinatorMessage>) -> Self {
        Self {
            session: Uuid::new_v4(),
            sender,
        }
    }

    pub fn session(&self) -> Uuid {
        self.session
    }
}

#[derive(Debug)]
pub struct BuilderSlot {
    builder: Builder,
    connection: Option<Connection>,
}

/// Exclusive access to one builder
pub type BuilderHandle = OwnedMutexGuard<BuilderSlot>;

#[derive(Debug, thiserror::Error)]
#[error("builder {0} is not connected")]
pub struct NotConnected(pub String);

impl BuilderSlot {
    pub fn builder(&self) -> &Builder {
        &self.builder
    }

    pub fn is_ready(&self) -> bool {
        self.builder.state == BuilderState::Ready && self.connection.is_some()
    }

    pub fn mark_busy(&mut self, build_id: Uuid) {
        self.builder.state = BuilderState::Busy;
        self.builder.build_id = Some(build_id);
    }

    /// Returns the builder to the ready pool if it is still working on `build_id`
    pub fn release(&mut self, build_id: Uuid) -> bool {
        if self.builder.build_id != Some(build_id) {
            return false;
        }
        self.builder.build_id = None;
        if self.builder.state == BuilderState::Busy {
            self.builder.state = BuilderState::Ready;
        }
        true
    }

    pub fn send(&self, message: CoordinatorMessage) -> Result<(), NotConnected> {
        let connection = self
            .connection
            .as_ref()
            .ok_or_else(|| NotConnected(self.builder.id.clone()))?;
        connection
            .sender
            .send(message)
            .map_err(|_| NotConnected(self.builder.id.clone()))
    }

    pub fn disconnect(&mut self) {
        self.connection = None;
        self.builder.state = BuilderState::Disconnected;
        self.builder.build_id = None;
    }
}

#[derive(Debug, Default)]
pub struct BuilderRegistry {
    slots: RwLock<HashMap<String, Arc<Mutex<BuilderSlot>>>>,
}

impl BuilderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a new connection to `builder_id` and marks it ready
    pub async fn connect(&self, builder_id: &str, connection: Connection) {
        let slot = self.slot_or_insert(builder_id);
        let mut slot = slot.lock().await;

        if slot.connection.is_some() {
            tracing::warn!("Builder {} reconnected, replacing old connection", builder_id);
        }

        slot.connection = Some(connection);
        slot.builder.state = BuilderState::Ready;
        slot.builder.build_id = None;

        tracing::info!("Builder connected: {}", builder_id);
    }

    /// Drops the connection if `session` is still the bound one
    pub async fn disconnect(&self, builder_id: &str, session: Uuid) {
        let Some(slot) = self.slot(builder_id) else {
            return;
        };
        let mut slot = slot.lock().await;

        let current = slot.connection.as_ref().map(Connection::session);
        if current != Some(session) {
            tracing::debug!("Ignoring disconnect of stale session for builder {}", builder_id);
            return;
        }

        if let Some(build_id) = slot.builder.build_id {
            tracing::warn!(
                "Builder {} disconnected while running build {}",
                builder_id,
                build_id
            );
        }
        slot.disconnect();

        tracing::info!("Builder disconnected: {}", builder_id);
    }

    /// Locks one builder for a read-modify-write sequence
    pub async fn lock(&self, builder_id: &str) -> Option<BuilderHandle> {
        let slot = self.slot(builder_id)?;
        Some(slot.lock_owned().await)
    }

    /// Ids of builders that can take a build, sorted
    pub async fn ready_builders(&self) -> Vec<String> {
        let mut ready = Vec::new();
        for (id, slot) in self.snapshot() {
            if slot.lock().await.is_ready() {
                ready.push(id);
            }
        }
        ready.sort();
        ready
    }

    pub async fn list(&self) -> Vec<Builder> {
        let mut builders = Vec::new();
        for (_, slot) in self.snapshot() {
            builders.push(slot.lock().await.builder.clone());
        }
        builders.sort_by(|a, b| a.id.cmp(&b.id));
        builders
    }

    fn slot(&self, builder_id: &str) -> Option<Arc<Mutex<BuilderSlot>>> {
        self.slots.read().get(builder_id).cloned()
    }

    fn slot_or_insert(&self, builder_id: &str) -> Arc<Mutex<BuilderSlot>> {
        let mut slots = self.slots.write();
        let slot = slots.entry(builder_id.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(BuilderSlot {
                builder: Builder {
                    id: builder_id.to_string(),
                    state: BuilderState::Disconnected,
                    build_id: None,
                },
                connection: None,
            }))
        });
        Arc::clone(slot)
    }

    fn snapshot(&self) -> Vec<(String, Arc<Mutex<BuilderSlot>>)> {
        self.slots
            .read()
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect()
    }
}
