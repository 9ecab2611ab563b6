//! Catalog Repository
//!
//! Projects, commits and the task definitions found at those commits.

use conveyor_core::domain::project::{Commit, Project, TaskRecord};
use uuid::Uuid;

use super::store::{KvStore, StoreResult, get_json, keys, put_json, scan_json};

pub async fn save_project(store: &dyn KvStore, project: &Project) -> StoreResult<()> {
    put_json(store, &keys::project(project.id), project).await
}

pub async fn find_project(store: &dyn KvStore, id: Uuid) -> StoreResult<Option<Project>> {
    get_json(store, &keys::project(id)).await
}

pub async fn save_commit(store: &dyn KvStore, commit: &Commit) -> StoreResult<()> {
    put_json(store, &keys::commit(commit.id), commit).await
}

pub async fn find_commit(store: &dyn KvStore, id: Uuid) -> StoreResult<Option<Commit>> {
    get_json(store, &keys::commit(id)).await
}

pub async fn save_task(store: &dyn KvStore, task: &TaskRecord) -> StoreResult<()> {
    put_json(store, &keys::task(task.id), task).await
}

pub async fn find_task(store: &dyn KvStore, id: Uuid) -> StoreResult<Option<TaskRecord>> {
    get_json(store, &keys::task(id)).await
}

pub async fn list_tasks(store: &dyn KvStore) -> StoreResult<Vec<TaskRecord>> {
    scan_json(store, keys::tasks()).await
}
