//! Log Ingestion
//!
//! Handles the log lines a builder sends while it runs a build. Every line
//! is stored and broadcast, then drives the state of its step and build:
//!
//! - a step becomes running on its first line and terminal on a line tagged
//!   with a terminal status
//! - the build records its start on its first line
//! - a failed step fails the build at once; a successful last step
//!   completes it
//! - once the build is terminal its builder returns to the ready pool

use chrono::Utc;
use conveyor_core::domain::build::{BuildStatus, StepStatus, StreamLine};
use conveyor_core::dto::event::{
    BUILD_UPDATED, STEP_UPDATED, STREAM_LINE_NEW, build_topic, step_topic, stream_topic,
};
use conveyor_core::dto::protocol::LogLine;
use thiserror::Error;
use uuid::Uuid;

use crate::broker::payload;
use crate::repository::store::keys;
use crate::repository::{StoreError, build_repository, stream_repository};
use crate::state::AppState;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("unknown build {0}")]
    UnknownBuild(Uuid),

    #[error("unknown step {step_id} of build {build_id}")]
    UnknownStep { build_id: Uuid, step_id: Uuid },

    #[error("unknown stream {stream_id} of step {step_id}")]
    UnknownStream { step_id: Uuid, stream_id: Uuid },

    #[error("line {line_number} of stream {stream_id} was already received")]
    DuplicateLine { stream_id: Uuid, line_number: u64 },

    #[error("build {build_id} is not assigned to builder {builder_id}")]
    NotAssigned { build_id: Uuid, builder_id: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, IngestError>;

pub async fn ingest(state: &AppState, builder_id: &str, line: LogLine) -> Result<()> {
    let store = state.store();
    let now = Utc::now();

    let build_lock = state.locks.lock(keys::build(line.build_id)).await;

    let mut build = build_repository::find_by_id(store, line.build_id)
        .await?
        .ok_or(IngestError::UnknownBuild(line.build_id))?;
    if build.builder_id.as_deref() != Some(builder_id) {
        return Err(IngestError::NotAssigned {
            build_id: build.id,
            builder_id: builder_id.to_string(),
        });
    }

    let mut step = build_repository::find_step(store, line.build_id, line.step_id)
        .await?
        .ok_or(IngestError::UnknownStep {
            build_id: line.build_id,
            step_id: line.step_id,
        })?;

    if stream_repository::find(store, step.id, line.stream_id)
        .await?
        .is_none()
    {
        return Err(IngestError::UnknownStream {
            step_id: step.id,
            stream_id: line.stream_id,
        });
    }

    let stream_line = StreamLine {
        stream_id: line.stream_id,
        line_number: line.line_number,
        timestamp: now,
        status: line.status,
        output: line.output,
    };
    // Lines are never rewritten; a repeated number changes nothing
    if !stream_repository::append_line(store, &stream_line).await? {
        return Err(IngestError::DuplicateLine {
            stream_id: stream_line.stream_id,
            line_number: stream_line.line_number,
        });
    }
    state.broker().emit_all(
        &stream_topic(stream_line.stream_id),
        STREAM_LINE_NEW,
        payload(&stream_line),
    );

    let target = match stream_line.status {
        StepStatus::Waiting => StepStatus::Running,
        status => status,
    };
    if step.advance(target, now) {
        build_repository::save_step(store, &step).await?;
        state
            .broker()
            .emit_all(&step_topic(step.id), STEP_UPDATED, payload(&step));
        tracing::debug!("Step {} of build {} is {}", step.number, build.id, step.status);
    }

    let mut build_changed = build.mark_started(now);
    build_changed |= build.advance(BuildStatus::Running, now);

    match step.status {
        StepStatus::Failed => {
            build_changed |= build.advance(BuildStatus::Failed, now);
        }
        StepStatus::Success => {
            let steps = build_repository::list_steps(store, build.id).await?;
            let last = steps.iter().map(|s| s.number).max();
            if last == Some(step.number) {
                build_changed |= build.advance(BuildStatus::Success, now);
            }
        }
        StepStatus::Waiting | StepStatus::Running => {}
    }

    if build_changed {
        build_repository::save(store, &build).await?;
        state
            .broker()
            .emit_all(&build_topic(build.id), BUILD_UPDATED, payload(&build));
        if build.status.is_terminal() {
            tracing::info!("Build {} finished: {}", build.id, build.status);
        }
    }

    drop(build_lock);

    if build.status.is_terminal()
        && let Some(mut builder) = state.builders.lock(builder_id).await
        && builder.release(build.id)
    {
        tracing::info!("Builder {} is ready", builder_id);
        state.wake.notify_one();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::dispatch::dispatch;
    use crate::service::registry::Connection;
    use crate::service::testing::{seed_task, two_step_task};
    use conveyor_core::domain::build::{Build, BuildStep};
    use conveyor_core::domain::builder::BuilderState;
    use conveyor_core::dto::protocol::{Command, CoordinatorMessage};
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    async fn dispatched(state: &AppState) -> Command {
        let task_id = seed_task(state, two_step_task()).await;
        let build = Build::new(task_id, HashMap::new());
        build_repository::save(state.store(), &build).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        state.builders.connect("b1", Connection::new(tx)).await;
        dispatch(state, "b1", build.id).await.unwrap();
        let CoordinatorMessage::Command(command) = rx.recv().await.unwrap();
        *command
    }

    fn log(command: &Command, step: usize, line_number: u64, status: StepStatus) -> LogLine {
        let detail = &command.steps[step];
        LogLine {
            stream_id: detail.streams[0].id,
            step_id: detail.step.id,
            build_id: command.build.id,
            line_number,
            status,
            output: format!("line {line_number}"),
        }
    }

    async fn build_status(state: &AppState, id: Uuid) -> BuildStatus {
        build_repository::find_by_id(state.store(), id)
            .await
            .unwrap()
            .unwrap()
            .status
    }

    async fn steps(state: &AppState, id: Uuid) -> Vec<BuildStep> {
        build_repository::list_steps(state.store(), id).await.unwrap()
    }

    #[tokio::test]
    async fn test_first_line_starts_step_and_build() {
        let state = AppState::in_memory();
        let command = dispatched(&state).await;

        ingest(&state, "b1", log(&command, 0, 1, StepStatus::Running))
            .await
            .unwrap();

        let build = build_repository::find_by_id(state.store(), command.build.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(build.status, BuildStatus::Running);
        assert!(build.started_at.is_some());

        let steps = steps(&state, command.build.id).await;
        assert_eq!(steps[0].status, StepStatus::Running);
        assert_eq!(steps[1].status, StepStatus::Waiting);
    }

    #[tokio::test]
    async fn test_lines_are_stored_and_broadcast() {
        let state = AppState::in_memory();
        let command = dispatched(&state).await;
        let mut events = state.events.subscribe();

        for n in 1..=3 {
            ingest(&state, "b1", log(&command, 0, n, StepStatus::Running))
                .await
                .unwrap();
        }

        let lines = stream_repository::list_lines(state.store(), command.steps[0].streams[0].id, 1)
            .await
            .unwrap();
        let numbers: Vec<u64> = lines.iter().map(|l| l.line_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);

        let first = events.recv().await.unwrap();
        assert_eq!(first.event, STREAM_LINE_NEW);
        assert_eq!(first.topic, stream_topic(command.steps[0].streams[0].id));
    }

    #[tokio::test]
    async fn test_failed_last_step_fails_build_and_frees_builder() {
        let state = AppState::in_memory();
        let command = dispatched(&state).await;

        ingest(&state, "b1", log(&command, 0, 1, StepStatus::Running)).await.unwrap();
        ingest(&state, "b1", log(&command, 0, 2, StepStatus::Success)).await.unwrap();
        assert_eq!(build_status(&state, command.build.id).await, BuildStatus::Running);

        ingest(&state, "b1", log(&command, 1, 1, StepStatus::Running)).await.unwrap();
        ingest(&state, "b1", log(&command, 1, 2, StepStatus::Failed)).await.unwrap();

        assert_eq!(build_status(&state, command.build.id).await, BuildStatus::Failed);
        let builders = state.builders.list().await;
        assert_eq!(builders[0].state, BuilderState::Ready);
        assert_eq!(builders[0].build_id, None);
    }

    #[tokio::test]
    async fn test_successful_last_step_completes_build() {
        let state = AppState::in_memory();
        let command = dispatched(&state).await;

        ingest(&state, "b1", log(&command, 0, 1, StepStatus::Success)).await.unwrap();
        ingest(&state, "b1", log(&command, 1, 1, StepStatus::Success)).await.unwrap();

        assert_eq!(build_status(&state, command.build.id).await, BuildStatus::Success);
        let steps = steps(&state, command.build.id).await;
        assert!(steps.iter().all(|s| s.status == StepStatus::Success));
    }

    #[tokio::test]
    async fn test_failed_first_step_short_circuits() {
        let state = AppState::in_memory();
        let command = dispatched(&state).await;

        ingest(&state, "b1", log(&command, 0, 1, StepStatus::Failed)).await.unwrap();

        assert_eq!(build_status(&state, command.build.id).await, BuildStatus::Failed);
        let steps = steps(&state, command.build.id).await;
        assert_eq!(steps[1].status, StepStatus::Waiting);
        assert_eq!(state.builders.ready_builders().await, vec!["b1"]);
    }

    #[tokio::test]
    async fn test_terminal_status_is_never_overwritten() {
        let state = AppState::in_memory();
        let command = dispatched(&state).await;

        ingest(&state, "b1", log(&command, 0, 1, StepStatus::Failed)).await.unwrap();
        ingest(&state, "b1", log(&command, 0, 2, StepStatus::Success)).await.unwrap();
        ingest(&state, "b1", log(&command, 1, 1, StepStatus::Success)).await.unwrap();

        assert_eq!(build_status(&state, command.build.id).await, BuildStatus::Failed);
        assert_eq!(steps(&state, command.build.id).await[0].status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn test_line_from_other_builder_is_rejected() {
        let state = AppState::in_memory();
        let command = dispatched(&state).await;

        let err = ingest(&state, "b2", log(&command, 0, 1, StepStatus::Running))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::NotAssigned { .. }));
    }

    #[tokio::test]
    async fn test_unknown_step() {
        let state = AppState::in_memory();
        let command = dispatched(&state).await;
        let mut line = log(&command, 0, 1, StepStatus::Running);
        line.step_id = Uuid::new_v4();

        let err = ingest(&state, "b1", line).await.unwrap_err();
        assert!(matches!(err, IngestError::UnknownStep { .. }));
    }

    #[tokio::test]
    async fn test_line_for_other_build_stream_is_rejected() {
        let state = AppState::in_memory();
        let ours = dispatched(&state).await;

        let task_id = seed_task(&state, two_step_task()).await;
        let other = Build::new(task_id, HashMap::new());
        build_repository::save(state.store(), &other).await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        state.builders.connect("b2", Connection::new(tx)).await;
        dispatch(&state, "b2", other.id).await.unwrap();
        let CoordinatorMessage::Command(theirs) = rx.recv().await.unwrap();
        let foreign = theirs.steps[0].streams[0].id;

        let mut line = log(&ours, 0, 1, StepStatus::Running);
        line.stream_id = foreign;
        let err = ingest(&state, "b1", line).await.unwrap_err();
        assert!(matches!(err, IngestError::UnknownStream { .. }));

        let stored = stream_repository::list_lines(state.store(), foreign, 1)
            .await
            .unwrap();
        assert!(stored.is_empty());
        assert_eq!(steps(&state, ours.build.id).await[0].status, StepStatus::Waiting);
    }

    #[tokio::test]
    async fn test_line_for_missing_stream_is_rejected() {
        let state = AppState::in_memory();
        let command = dispatched(&state).await;
        let mut line = log(&command, 0, 1, StepStatus::Running);
        line.stream_id = Uuid::new_v4();
        let missing = line.stream_id;

        let err = ingest(&state, "b1", line).await.unwrap_err();
        assert!(matches!(err, IngestError::UnknownStream { .. }));
        assert!(
            stream_repository::list_lines(state.store(), missing, 1)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_repeated_line_number_keeps_first_line() {
        let state = AppState::in_memory();
        let command = dispatched(&state).await;

        let mut first = log(&command, 0, 1, StepStatus::Running);
        first.output = "original".into();
        ingest(&state, "b1", first).await.unwrap();

        let mut repeat = log(&command, 0, 1, StepStatus::Failed);
        repeat.output = "rewritten".into();
        let err = ingest(&state, "b1", repeat).await.unwrap_err();
        assert!(matches!(err, IngestError::DuplicateLine { line_number: 1, .. }));

        let outputs: Vec<String> =
            stream_repository::list_lines(state.store(), command.steps[0].streams[0].id, 1)
                .await
                .unwrap()
                .into_iter()
                .map(|l| l.output)
                .collect();
        assert_eq!(outputs, vec!["original"]);
        assert_eq!(steps(&state, command.build.id).await[0].status, StepStatus::Running);
        assert_eq!(build_status(&state, command.build.id).await, BuildStatus::Running);
    }
}
