//! Catalog Service
//!
//! Loads projects, commits and task definitions from a YAML seed file.
//! Every task is validated before anything is stored.
//!
//! ```yaml
//! projects:
//!   - id: 6d0c...
//!     name: api
//!     repository: https://git.example.com/acme/api.git
//!     commits:
//!       - id: 1b9e...
//!         hash: 3f1c2a9d
//!         branch: main
//!         tasks:
//!           - id: 9a41...
//!             definition:
//!               name: build-and-test
//!               steps: [...]
//! ```

use std::path::Path;

use anyhow::Context;
use conveyor_core::domain::project::{Commit, Project, TaskRecord};
use conveyor_core::domain::task::Task;
use serde::Deserialize;
use uuid::Uuid;

use crate::repository::catalog_repository;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CatalogSeed {
    #[serde(default)]
    pub projects: Vec<ProjectSeed>,
}

#[derive(Debug, Deserialize)]
pub struct ProjectSeed {
    pub id: Uuid,
    pub name: String,
    pub repository: String,

    #[serde(default)]
    pub commits: Vec<CommitSeed>,
}

#[derive(Debug, Deserialize)]
pub struct CommitSeed {
    pub id: Uuid,
    pub hash: String,

    #[serde(default)]
    pub branch: String,

    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub tasks: Vec<TaskSeed>,
}

#[derive(Debug, Deserialize)]
pub struct TaskSeed {
    pub id: Uuid,
    pub definition: Task,
}

impl CatalogSeed {
    pub fn from_yaml(source: &str) -> anyhow::Result<Self> {
        let seed: CatalogSeed = serde_yaml::from_str(source).context("Failed to parse catalog")?;

        for project in &seed.projects {
            for commit in &project.commits {
                for task in &commit.tasks {
                    task.definition.validate().with_context(|| {
                        format!("Task {} of commit {} is invalid", task.id, commit.hash)
                    })?;
                }
            }
        }

        Ok(seed)
    }
}

/// Reads `path` and stores its content; returns the number of tasks loaded
pub async fn load_catalog(state: &AppState, path: &Path) -> anyhow::Result<usize> {
    let source = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read catalog {}", path.display()))?;

    let seed = CatalogSeed::from_yaml(&source)?;
    store_catalog(state, seed).await
}

pub async fn store_catalog(state: &AppState, seed: CatalogSeed) -> anyhow::Result<usize> {
    let store = state.store();
    let mut tasks = 0;

    for project in seed.projects {
        let record = Project {
            id: project.id,
            name: project.name,
            repository: project.repository,
        };
        catalog_repository::save_project(store, &record).await?;

        for commit in project.commits {
            let commit_record = Commit {
                id: commit.id,
                project_id: record.id,
                hash: commit.hash,
                branch: commit.branch,
                message: commit.message,
            };
            catalog_repository::save_commit(store, &commit_record).await?;

            for task in commit.tasks {
                catalog_repository::save_task(
                    store,
                    &TaskRecord {
                        id: task.id,
                        commit_id: commit_record.id,
                        task: task.definition,
                    },
                )
                .await?;
                tasks += 1;
            }
        }

        tracing::info!("Loaded project {}", record.name);
    }

    Ok(tasks)
}
