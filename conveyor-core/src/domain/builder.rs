//! Builder domain model
//!
//! A builder is a remote agent that executes builds. Its identity and state
//! are durable; the connection it is reachable through is tracked separately
//! by the coordinator.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A builder known to the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Builder {
    pub id: String,
    pub state: BuilderState,

    /// Build currently assigned to the builder
    pub build_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuilderState {
    Disconnected,
    Ready,
    Busy,
}

impl std::fmt::Display for BuilderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuilderState::Disconnected => write!(f, "disconnected"),
            BuilderState::Ready => write!(f, "ready"),
            BuilderState::Busy => write!(f, "busy"),
        }
    }
}
