//! Event subscriptions
//!
//! Clients subscribe to topics such as `build:<id>` or `stream:<id>` and
//! receive the matching broker events as JSON text frames.

use std::collections::HashSet;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use conveyor_core::dto::event::SubscriberMessage;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;

use crate::state::AppState;

/// GET /events/ws
pub async fn subscribe(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_subscriber(socket, state))
}

async fn handle_subscriber(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.events.subscribe();
    let mut topics: HashSet<String> = HashSet::new();

    loop {
        tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<SubscriberMessage>(text.as_str()) {
                        Ok(SubscriberMessage::Subscribe { topic }) => {
                            topics.insert(topic);
                        }
                        Ok(SubscriberMessage::Unsubscribe { topic }) => {
                            topics.remove(&topic);
                        }
                        Err(e) => tracing::debug!("Ignoring subscriber message: {}", e),
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!("Subscriber socket error: {}", e);
                    break;
                }
            },
            event = events.recv() => match event {
                Ok(event) if topics.contains(&event.topic) => {
                    let Ok(json) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("Subscriber lagged behind, {} event(s) dropped", missed);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
}
