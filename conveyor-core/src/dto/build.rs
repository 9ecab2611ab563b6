//! Build DTOs for the coordinator API

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::build::{Build, BuildStep, Stream, StreamLine};

/// Request to queue a build of a stored task
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBuild {
    pub task_id: Uuid,

    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

/// A build step together with its streams
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDetail {
    #[serde(flatten)]
    pub step: BuildStep,
    pub streams: Vec<Stream>,
}

/// A build with its steps, ordered by step number
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildDetail {
    #[serde(flatten)]
    pub build: Build,
    pub steps: Vec<StepDetail>,
}

/// A page of stream output starting at `from`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamLines {
    pub stream_id: Uuid,
    pub from: u64,
    pub lines: Vec<StreamLine>,
}
