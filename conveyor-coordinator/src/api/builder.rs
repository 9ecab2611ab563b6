//! Builder API Handlers
//!
//! Builders hold a WebSocket open to the coordinator. Commands are pushed
//! down the socket; log lines come back up and are ingested one at a time,
//! in arrival order.

use axum::{
    Json,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use conveyor_core::domain::builder::Builder;
use conveyor_core::dto::protocol::{BuilderMessage, CoordinatorMessage};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::api::error::{ApiError, ApiResult};
use crate::service::ingest_service;
use crate::service::registry::Connection;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectQuery {
    pub builder_id: String,
}

/// GET /builders
/// List known builders and their state
pub async fn list_builders(State(state): State<AppState>) -> Json<Vec<Builder>> {
    Json(state.builders.list().await)
}

/// GET /builders/ws?builderId=...
/// Upgrade to the builder transport
pub async fn connect_builder(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
) -> ApiResult<Response> {
    let builder_id = query.builder_id.trim().to_string();
    if builder_id.is_empty() || builder_id.len() > 255 {
        return Err(ApiError::BadRequest(
            "builderId must be between 1 and 255 characters".to_string(),
        ));
    }

    Ok(ws.on_upgrade(move |socket| handle_builder(socket, state, builder_id)))
}

async fn handle_builder(socket: WebSocket, state: AppState, builder_id: String) {
    let (mut sink, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<CoordinatorMessage>();

    let connection = Connection::new(tx);
    let session = connection.session();
    state.builders.connect(&builder_id, connection).await;
    state.wake.notify_one();

    // Ends once the registry drops the sending half
    let writer_id = builder_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!("Could not encode message for {}: {}", writer_id, e);
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(json.into())).await {
                tracing::warn!("Could not write to builder {}: {}", writer_id, e);
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    tracing::warn!("Ignoring non UTF-8 frame from builder {}", builder_id);
                    continue;
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!("WebSocket error from builder {}: {}", builder_id, e);
                break;
            }
        };

        match serde_json::from_str::<BuilderMessage>(&text) {
            Ok(BuilderMessage::Log(line)) => {
                if let Err(e) = ingest_service::ingest(&state, &builder_id, line).await {
                    tracing::warn!("Dropped log line from builder {}: {}", builder_id, e);
                }
            }
            Err(e) => {
                tracing::warn!("Ignoring message from builder {}: {}", builder_id, e);
            }
        }
    }

    state.builders.disconnect(&builder_id, session).await;
    writer.abort();
}
