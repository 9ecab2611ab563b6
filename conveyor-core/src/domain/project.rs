//! Projects, commits and stored tasks

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::task::Task;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub repository: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub id: Uuid,
    pub project_id: Uuid,
    pub hash: String,

    #[serde(default)]
    pub branch: String,

    #[serde(default)]
    pub message: String,
}

impl Commit {
    pub fn short_hash(&self) -> &str {
        let end = self
            .hash
            .char_indices()
            .nth(7)
            .map(|(i, _)| i)
            .unwrap_or(self.hash.len());
        &self.hash[..end]
    }
}

/// A task definition as found at a commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: Uuid,
    pub commit_id: Uuid,
    pub task: Task,
}
