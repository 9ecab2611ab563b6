//! API Module
//!
//! HTTP and WebSocket layer for the coordinator.
//! Each submodule handles endpoints for a specific domain.

pub mod build;
pub mod builder;
pub mod error;
pub mod events;
pub mod health;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Build endpoints
        .route("/builds", post(build::create_build))
        .route("/builds", get(build::list_builds))
        .route("/builds/{id}", get(build::get_build))
        .route("/streams/{id}/lines", get(build::get_stream_lines))
        // Builder endpoints
        .route("/builders", get(builder::list_builders))
        .route("/builders/ws", get(builder::connect_builder))
        // Event subscriptions
        .route("/events/ws", get(events::subscribe))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
