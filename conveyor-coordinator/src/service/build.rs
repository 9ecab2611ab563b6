//! Build Service
//!
//! Queues builds and serves their state and output.

use conveyor_core::TaskError;
use conveyor_core::domain::build::Build;
use conveyor_core::dto::build::{BuildDetail, CreateBuild, StepDetail, StreamLines};
use conveyor_core::dto::event::{BUILD_UPDATED, build_topic};
use thiserror::Error;
use uuid::Uuid;

use crate::broker::payload;
use crate::repository::{StoreError, build_repository, catalog_repository, stream_repository};
use crate::state::AppState;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("build {0} not found")]
    NotFound(Uuid),

    #[error("task {0} not found")]
    TaskNotFound(Uuid),

    #[error("stream {0} not found")]
    StreamNotFound(Uuid),

    #[error(transparent)]
    Validation(#[from] TaskError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, BuildError>;

/// Validates the request and queues a pending build
pub async fn create_build(state: &AppState, req: CreateBuild) -> Result<Build> {
    let store = state.store();

    let record = catalog_repository::find_task(store, req.task_id)
        .await?
        .ok_or(BuildError::TaskNotFound(req.task_id))?;

    record.task.validate_overrides(&req.parameters)?;

    let build = Build::new(record.id, req.parameters);
    build_repository::save(store, &build).await?;

    state
        .broker()
        .emit_all(&build_topic(build.id), BUILD_UPDATED, payload(&build));
    state.wake.notify_one();

    tracing::info!("Build created: {} for task: {}", build.id, record.id);

    Ok(build)
}

pub async fn get_build(state: &AppState, id: Uuid) -> Result<BuildDetail> {
    let store = state.store();

    let build = build_repository::find_by_id(store, id)
        .await?
        .ok_or(BuildError::NotFound(id))?;

    let mut steps = Vec::new();
    for step in build_repository::list_steps(store, id).await? {
        let streams = stream_repository::list_by_step(store, step.id).await?;
        steps.push(StepDetail { step, streams });
    }

    Ok(BuildDetail { build, steps })
}

pub async fn list_builds(state: &AppState) -> Result<Vec<Build>> {
    Ok(build_repository::list_all(state.store()).await?)
}

/// Output of a stream starting at line `from`
pub async fn stream_lines(state: &AppState, stream_id: Uuid, from: u64) -> Result<StreamLines> {
    let store = state.store();

    stream_repository::find_by_id(store, stream_id)
        .await?
        .ok_or(BuildError::StreamNotFound(stream_id))?;

    let lines = stream_repository::list_lines(store, stream_id, from).await?;

    Ok(StreamLines {
        stream_id,
        from,
        lines,
    })
}
