//! Events fanned out to API subscribers

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const STREAM_LINE_NEW: &str = "streamLine:new";
pub const STEP_UPDATED: &str = "buildStep:update";
pub const BUILD_UPDATED: &str = "build:update";

pub fn stream_topic(stream_id: Uuid) -> String {
    format!("stream:{stream_id}")
}

pub fn step_topic(step_id: Uuid) -> String {
    format!("step:{step_id}")
}

pub fn build_topic(build_id: Uuid) -> String {
    format!("build:{build_id}")
}

/// One broker event as delivered to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub topic: String,
    pub event: String,
    pub payload: serde_json::Value,
}

/// Messages a subscriber sends over the events socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubscriberMessage {
    Subscribe { topic: String },
    Unsubscribe { topic: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics() {
        let id = Uuid::nil();
        assert_eq!(
            stream_topic(id),
            "stream:00000000-0000-0000-0000-000000000000"
        );
        assert!(build_topic(id).starts_with("build:"));
        assert!(step_topic(id).starts_with("step:"));
    }

    #[test]
    fn test_subscriber_message() {
        let msg: SubscriberMessage =
            serde_json::from_str(r#"{"type":"subscribe","topic":"build:1"}"#).unwrap();
        assert_eq!(
            msg,
            SubscriberMessage::Subscribe {
                topic: "build:1".into()
            }
        );
    }
}
