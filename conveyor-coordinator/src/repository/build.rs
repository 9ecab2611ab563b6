//! Build Repository
//!
//! Builds and build steps in the key space.

use conveyor_core::domain::build::{Build, BuildStatus, BuildStep};
use uuid::Uuid;

use super::store::{KvStore, StoreResult, get_json, keys, put_json, scan_json};

pub async fn save(store: &dyn KvStore, build: &Build) -> StoreResult<()> {
    put_json(store, &keys::build(build.id), build).await
}

pub async fn find_by_id(store: &dyn KvStore, id: Uuid) -> StoreResult<Option<Build>> {
    get_json(store, &keys::build(id)).await
}

/// All builds, newest first
pub async fn list_all(store: &dyn KvStore) -> StoreResult<Vec<Build>> {
    let mut builds: Vec<Build> = scan_json(store, keys::builds()).await?;
    builds.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(builds)
}

/// Pending builds, oldest first
pub async fn list_pending(store: &dyn KvStore) -> StoreResult<Vec<Build>> {
    let mut builds: Vec<Build> = scan_json::<Build>(store, keys::builds())
        .await?
        .into_iter()
        .filter(|b| b.status == BuildStatus::Pending)
        .collect();
    builds.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(builds)
}

pub async fn save_step(store: &dyn KvStore, step: &BuildStep) -> StoreResult<()> {
    put_json(store, &keys::build_step(step.build_id, step.id), step).await
}

pub async fn find_step(
    store: &dyn KvStore,
    build_id: Uuid,
    step_id: Uuid,
) -> StoreResult<Option<BuildStep>> {
    get_json(store, &keys::build_step(build_id, step_id)).await
}

/// Steps of a build ordered by step number
pub async fn list_steps(store: &dyn KvStore, build_id: Uuid) -> StoreResult<Vec<BuildStep>> {
    let mut steps: Vec<BuildStep> = scan_json(store, &keys::build_steps(build_id)).await?;
    steps.sort_by_key(|s| s.number);
    Ok(steps)
}

pub async fn delete_step(store: &dyn KvStore, step: &BuildStep) -> StoreResult<bool> {
    store.delete(&keys::build_step(step.build_id, step.id)).await
}
