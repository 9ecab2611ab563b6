//! Build Dispatch
//!
//! Assigns a pending build to a ready builder: materializes the build steps
//! and streams for the task, assembles the command and sends it over the
//! builder's connection.

use chrono::Utc;
use conveyor_core::domain::build::{Build, BuildStatus, BuildStep, Stream};
use conveyor_core::domain::task::Task;
use conveyor_core::dto::build::StepDetail;
use conveyor_core::dto::event::{BUILD_UPDATED, build_topic};
use conveyor_core::dto::protocol::{Command, CoordinatorMessage};
use thiserror::Error;
use uuid::Uuid;

use crate::broker::payload;
use crate::repository::store::keys;
use crate::repository::{StoreError, build_repository, catalog_repository, stream_repository};
use crate::state::AppState;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("builder {0} is not ready")]
    BuilderNotReady(String),

    #[error("build {0} not found")]
    BuildNotFound(Uuid),

    #[error("build {0} is not pending")]
    BuildNotPending(Uuid),

    /// A stored record points at one that does not exist
    #[error("referential integrity violated: {0}")]
    ReferentialIntegrity(String),

    #[error("could not send command to builder {0}")]
    Transport(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DispatchError {
    /// Errors after which the coordinator cannot keep running safely
    pub fn is_fatal(&self) -> bool {
        matches!(self, DispatchError::ReferentialIntegrity(_))
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;

/// Dispatches `build_id` to `builder_id`
///
/// Both the builder and the build are locked for the whole sequence.
pub async fn dispatch(state: &AppState, builder_id: &str, build_id: Uuid) -> Result<Build> {
    let mut builder = state
        .builders
        .lock(builder_id)
        .await
        .ok_or_else(|| DispatchError::BuilderNotReady(builder_id.to_string()))?;
    if !builder.is_ready() {
        return Err(DispatchError::BuilderNotReady(builder_id.to_string()));
    }

    let _build_lock = state.locks.lock(keys::build(build_id)).await;
    let store = state.store();

    let mut build = build_repository::find_by_id(store, build_id)
        .await?
        .ok_or(DispatchError::BuildNotFound(build_id))?;
    if build.status != BuildStatus::Pending {
        return Err(DispatchError::BuildNotPending(build_id));
    }

    // Resolve everything before any state changes
    let record = catalog_repository::find_task(store, build.task_id)
        .await?
        .ok_or_else(|| {
            DispatchError::ReferentialIntegrity(format!(
                "build {} references missing task {}",
                build.id, build.task_id
            ))
        })?;
    let commit = catalog_repository::find_commit(store, record.commit_id)
        .await?
        .ok_or_else(|| {
            DispatchError::ReferentialIntegrity(format!(
                "task {} references missing commit {}",
                record.id, record.commit_id
            ))
        })?;
    let project = catalog_repository::find_project(store, commit.project_id)
        .await?
        .ok_or_else(|| {
            DispatchError::ReferentialIntegrity(format!(
                "commit {} references missing project {}",
                commit.id, commit.project_id
            ))
        })?;

    builder.mark_busy(build.id);

    let steps = match start(state, &mut build, builder_id, &record.task).await {
        Ok(steps) => steps,
        Err(e) => {
            builder.release(build.id);
            fail(state, &mut build).await;
            return Err(e);
        }
    };

    let command = Command {
        build: build.clone(),
        steps,
        project,
        commit,
        task: record.task,
    };

    if let Err(e) = builder.send(CoordinatorMessage::Command(Box::new(command))) {
        tracing::warn!("{}; treating builder as disconnected", e);
        builder.disconnect();

        // Nobody will report on this build
        fail(state, &mut build).await;
        return Err(DispatchError::Transport(builder_id.to_string()));
    }

    tracing::info!("Build {} dispatched to builder {}", build.id, builder_id);

    Ok(build)
}

/// Marks the build running and replaces its steps and streams
async fn start(
    state: &AppState,
    build: &mut Build,
    builder_id: &str,
    task: &Task,
) -> Result<Vec<StepDetail>> {
    let store = state.store();

    build.advance(BuildStatus::Running, Utc::now());
    build.builder_id = Some(builder_id.to_string());
    build_repository::save(store, build).await?;
    state
        .broker()
        .emit_all(&build_topic(build.id), BUILD_UPDATED, payload(&*build));

    // Leftovers of an earlier attempt
    for step in build_repository::list_steps(store, build.id).await? {
        for stream in stream_repository::list_by_step(store, step.id).await? {
            stream_repository::delete(store, &stream).await?;
        }
        build_repository::delete_step(store, &step).await?;
    }

    let mut steps = Vec::with_capacity(task.steps.len());
    for (number, task_step) in task.steps.iter().enumerate() {
        let step = BuildStep::new(build.id, number);
        build_repository::save_step(store, &step).await?;

        let mut streams = Vec::new();
        for name in task_step.output_streams() {
            let stream = Stream::new(step.id, name);
            stream_repository::save(store, &stream).await?;
            streams.push(stream);
        }

        steps.push(StepDetail { step, streams });
    }

    Ok(steps)
}

/// Fails a build no builder will report on
async fn fail(state: &AppState, build: &mut Build) {
    if !build.advance(BuildStatus::Failed, Utc::now()) {
        return;
    }
    if let Err(e) = build_repository::save(state.store(), build).await {
        tracing::error!("Could not mark build {} failed: {}", build.id, e);
        return;
    }
    state
        .broker()
        .emit_all(&build_topic(build.id), BUILD_UPDATED, payload(&*build));
}
