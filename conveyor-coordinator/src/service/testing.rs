//! Fixtures shared by the service tests

use std::collections::HashMap;

use conveyor_core::domain::build::Build;
use conveyor_core::domain::project::{Commit, Project, TaskRecord};
use conveyor_core::domain::task::Task;
use conveyor_core::dto::protocol::Command;
use uuid::Uuid;

use crate::repository::catalog_repository;
use crate::state::AppState;

pub fn two_step_task() -> Task {
    Task::from_yaml(
        r#"
name: build-and-test
parameters:
  - name: tag
    default: latest
steps:
  - type: build
    description: build-image
    tags: ["app:${tag}"]
  - type: run
    description: run-tests
    image: app:${tag}
    command: make test
"#,
    )
    .unwrap()
}

pub fn project() -> Project {
    Project {
        id: Uuid::new_v4(),
        name: "api".into(),
        repository: "https://git.example.com/acme/api.git".into(),
    }
}

pub fn commit(project_id: Uuid) -> Commit {
    Commit {
        id: Uuid::new_v4(),
        project_id,
        hash: "3f1c2a9d8e7b6a5c4d3e2f1a0b9c8d7e6f5a4b3c".into(),
        branch: "main".into(),
        message: "Add integration tests".into(),
    }
}

/// Stores a project, a commit and `task`; returns the task id
pub async fn seed_task(state: &AppState, task: Task) -> Uuid {
    let project = project();
    let commit = commit(project.id);
    let record = TaskRecord {
        id: Uuid::new_v4(),
        commit_id: commit.id,
        task,
    };

    catalog_repository::save_project(state.store(), &project)
        .await
        .unwrap();
    catalog_repository::save_commit(state.store(), &commit)
        .await
        .unwrap();
    catalog_repository::save_task(state.store(), &record)
        .await
        .unwrap();

    record.id
}

pub fn command() -> Command {
    let project = project();
    let commit = commit(project.id);
    Command {
        build: Build::new(Uuid::new_v4(), HashMap::new()),
        steps: Vec::new(),
        project,
        commit,
        task: two_step_task(),
    }
}
