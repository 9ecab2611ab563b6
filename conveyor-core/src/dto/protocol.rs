//! Builder transport messages
//!
//! Frames are JSON text messages of the form `{"type": ..., "data": ...}`.
//! The coordinator sends commands; builders send log lines.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::build::{Build, StepStatus};
use crate::domain::project::{Commit, Project};
use crate::domain::task::Task;
use crate::dto::build::StepDetail;

/// Everything a builder needs to run one build
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub build: Build,

    /// One entry per task step, in task order
    pub steps: Vec<StepDetail>,

    pub project: Project,
    pub commit: Commit,
    pub task: Task,
}

/// Coordinator to builder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum CoordinatorMessage {
    Command(Box<Command>),
}

/// Builder to coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum BuilderMessage {
    Log(LogLine),
}

/// One output line of a step, tagged with the step status at emission time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogLine {
    pub stream_id: Uuid,
    pub step_id: Uuid,
    pub build_id: Uuid,
    pub line_number: u64,
    pub status: StepStatus,
    pub output: String,
}
