//! Build domain types
//!
//! A build is one execution of a task. It owns one build step per task step
//! and every build step owns one stream per declared output. Statuses only
//! move forward: once terminal, a build or step keeps its status.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Build execution record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Build {
    pub id: Uuid,
    pub task_id: Uuid,

    /// Caller overrides for basic parameters
    #[serde(default)]
    pub parameters: HashMap<String, String>,

    pub status: BuildStatus,
    pub builder_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl BuildStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BuildStatus::Success | BuildStatus::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            BuildStatus::Pending => 0,
            BuildStatus::Running => 1,
            BuildStatus::Success | BuildStatus::Failed => 2,
        }
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildStatus::Pending => write!(f, "pending"),
            BuildStatus::Running => write!(f, "running"),
            BuildStatus::Success => write!(f, "success"),
            BuildStatus::Failed => write!(f, "failed"),
        }
    }
}

impl Build {
    pub fn new(task_id: Uuid, parameters: HashMap<String, String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            task_id,
            parameters,
            status: BuildStatus::Pending,
            builder_id: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Moves the build forward; returns false when the transition would regress
    pub fn advance(&mut self, status: BuildStatus, at: DateTime<Utc>) -> bool {
        if self.status.is_terminal() || status.rank() <= self.status.rank() {
            return false;
        }
        self.status = status;
        self.updated_at = at;
        if status.is_terminal() {
            self.completed_at = Some(at);
        }
        true
    }

    /// Records the first output of the build; dispatch only marks it running
    pub fn mark_started(&mut self, at: DateTime<Utc>) -> bool {
        if self.started_at.is_some() {
            return false;
        }
        self.started_at = Some(at);
        self.updated_at = at;
        true
    }
}

/// One task step as executed within a build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStep {
    pub id: Uuid,
    pub build_id: Uuid,

    /// Zero-based position of the step in the task
    pub number: usize,

    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Waiting,
    Running,
    Success,
    Failed,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Success | StepStatus::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            StepStatus::Waiting => 0,
            StepStatus::Running => 1,
            StepStatus::Success | StepStatus::Failed => 2,
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Waiting => write!(f, "waiting"),
            StepStatus::Running => write!(f, "running"),
            StepStatus::Success => write!(f, "success"),
            StepStatus::Failed => write!(f, "failed"),
        }
    }
}

impl BuildStep {
    pub fn new(build_id: Uuid, number: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            build_id,
            number,
            status: StepStatus::Waiting,
            started_at: None,
            completed_at: None,
        }
    }

    /// Moves the step forward; a terminal status seen while waiting also
    /// records the start time
    pub fn advance(&mut self, status: StepStatus, at: DateTime<Utc>) -> bool {
        if self.status.is_terminal() || status.rank() <= self.status.rank() {
            return false;
        }
        self.status = status;
        if self.started_at.is_none() {
            self.started_at = Some(at);
        }
        if status.is_terminal() {
            self.completed_at = Some(at);
        }
        true
    }
}

/// A named output channel of a build step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stream {
    pub id: Uuid,
    pub build_step_id: Uuid,
    pub name: String,
}

impl Stream {
    /// The id is derived from the step and the name, so recreating the
    /// streams of a step yields the same ids
    pub fn new(build_step_id: Uuid, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: Uuid::new_v5(&build_step_id, name.as_bytes()),
            build_step_id,
            name,
        }
    }
}

/// One line of output, append-only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamLine {
    pub stream_id: Uuid,
    pub line_number: u64,
    pub timestamp: DateTime<Utc>,
    pub status: StepStatus,
    pub output: String,
}
