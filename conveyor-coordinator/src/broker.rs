//! Event broker
//!
//! Best-effort fan-out of state changes to API subscribers. Emitting never
//! blocks and never fails the caller; slow subscribers miss events.

use conveyor_core::dto::event::Event;
use serde_json::Value;
use tokio::sync::broadcast;

pub trait Broker: Send + Sync {
    fn emit_all(&self, topic: &str, event: &str, payload: Value);
}

#[derive(Debug, Clone)]
pub struct ChannelBroker {
    sender: broadcast::Sender<Event>,
}

impl ChannelBroker {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Broker for ChannelBroker {
    fn emit_all(&self, topic: &str, event: &str, payload: Value) {
        let event = Event {
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
        };
        // No receivers is not an error
        if self.sender.send(event).is_err() {
            tracing::trace!("No subscribers for topic {}", topic);
        }
    }
}

/// Serializes `record` for an event payload
pub fn payload<T: serde::Serialize>(record: &T) -> Value {
    serde_json::to_value(record).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_emit_reaches_subscribers() {
        let broker = ChannelBroker::new(8);
        let mut rx = broker.subscribe();

        broker.emit_all("build:1", "build:update", json!({"status": "running"}));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, "build:1");
        assert_eq!(event.payload["status"], "running");
    }

    #[test]
    fn test_emit_without_subscribers() {
        let broker = ChannelBroker::new(8);
        broker.emit_all("build:1", "build:update", Value::Null);
    }
}
