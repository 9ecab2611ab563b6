//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::repository::StoreError;
use crate::service::build_service::BuildError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    StoreError(StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::StoreError(err) => {
                tracing::error!("Store error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::StoreError(err)
    }
}

impl From<BuildError> for ApiError {
    fn from(err: BuildError) -> Self {
        match err {
            BuildError::NotFound(_) | BuildError::TaskNotFound(_) | BuildError::StreamNotFound(_) => {
                ApiError::NotFound(err.to_string())
            }
            BuildError::Validation(e) => ApiError::BadRequest(e.to_string()),
            BuildError::Store(e) => ApiError::StoreError(e),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::TaskError;
    use uuid::Uuid;

    #[test]
    fn test_build_error_status_codes() {
        let not_found: ApiError = BuildError::TaskNotFound(Uuid::nil()).into();
        assert_eq!(not_found.into_response().status(), StatusCode::NOT_FOUND);

        let invalid: ApiError =
            BuildError::Validation(TaskError::MissingParameter("tag".into())).into();
        assert_eq!(invalid.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
