//! Build API Handlers
//!
//! HTTP endpoints for queuing builds and reading their state and output.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use conveyor_core::domain::build::Build;
use conveyor_core::dto::build::{BuildDetail, CreateBuild, StreamLines};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::service::build_service;
use crate::state::AppState;

/// POST /builds
/// Queue a build of a stored task
pub async fn create_build(
    State(state): State<AppState>,
    Json(req): Json<CreateBuild>,
) -> ApiResult<(StatusCode, Json<Build>)> {
    tracing::info!("Creating build for task: {}", req.task_id);

    let build = build_service::create_build(&state, req).await?;

    Ok((StatusCode::CREATED, Json(build)))
}

/// GET /builds
/// List all builds, newest first
pub async fn list_builds(State(state): State<AppState>) -> ApiResult<Json<Vec<Build>>> {
    tracing::debug!("Listing builds");

    let builds = build_service::list_builds(&state).await?;

    Ok(Json(builds))
}

/// GET /builds/{id}
/// Get a build with its steps and streams
pub async fn get_build(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<BuildDetail>> {
    tracing::debug!("Getting build: {}", id);

    let build = build_service::get_build(&state, id).await?;

    Ok(Json(build))
}

#[derive(Debug, Deserialize)]
pub struct LinesQuery {
    #[serde(default = "first_line")]
    pub from: u64,
}

fn first_line() -> u64 {
    1
}

/// GET /streams/{id}/lines?from=N
/// Read a stream's output starting at line N
pub async fn get_stream_lines(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<LinesQuery>,
) -> ApiResult<Json<StreamLines>> {
    tracing::debug!("Getting lines of stream {} from {}", id, query.from);

    let lines = build_service::stream_lines(&state, id, query.from).await?;

    Ok(Json(lines))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::ApiError;
    use crate::service::testing::{seed_task, two_step_task};
    use conveyor_core::domain::build::BuildStatus;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_create_then_get_build() {
        let state = AppState::in_memory();
        let task_id = seed_task(&state, two_step_task()).await;

        let (status, Json(build)) = create_build(
            State(state.clone()),
            Json(CreateBuild {
                task_id,
                parameters: HashMap::new(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(build.status, BuildStatus::Pending);

        let Json(detail) = get_build(State(state.clone()), Path(build.id)).await.unwrap();
        assert_eq!(detail.build.id, build.id);
        assert!(detail.steps.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_task_is_not_found() {
        let state = AppState::in_memory();
        let result = create_build(
            State(state),
            Json(CreateBuild {
                task_id: Uuid::new_v4(),
                parameters: HashMap::new(),
            }),
        )
        .await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_lines_of_unknown_stream() {
        let state = AppState::in_memory();
        let result = get_stream_lines(
            State(state),
            Path(Uuid::new_v4()),
            Query(LinesQuery { from: 1 }),
        )
        .await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }
}
