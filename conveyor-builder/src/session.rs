//! Coordinator session
//!
//! Holds the WebSocket connection to the coordinator. Commands arrive on
//! the socket and run in their own task; log lines go back through a single
//! writer task that owns the sending half. A lost connection is retried
//! with exponential backoff.

use std::sync::Arc;

use anyhow::{Context, Result};
use conveyor_core::domain::build::BuildStatus;
use conveyor_core::dto::protocol::{BuilderMessage, CoordinatorMessage};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::service::ExecutionService;

const INITIAL_DELAY_MS: u64 = 500;

pub struct BuilderSession {
    config: Config,
    execution: Arc<dyn ExecutionService>,
}

impl BuilderSession {
    pub fn new(config: Config, execution: Arc<dyn ExecutionService>) -> Self {
        Self { config, execution }
    }

    /// Connects and serves commands, reconnecting for as long as the process runs
    pub async fn run(&self) -> Result<()> {
        let initial = Duration::from_millis(INITIAL_DELAY_MS);
        let mut delay = initial;

        loop {
            match self.serve().await {
                Ok(()) => {
                    warn!("Disconnected from coordinator");
                    delay = initial;
                }
                Err(e) => warn!("Could not reach coordinator: {:#}", e),
            }

            warn!("Reconnecting in {:?}...", delay);
            time::sleep(delay).await;

            // Exponential backoff with cap
            delay = (delay * 2).min(self.config.reconnect_max_delay);
        }
    }

    /// Serves one connection until it closes
    async fn serve(&self) -> Result<()> {
        let url = self.config.socket_url();
        let (socket, _) = connect_async(url.as_str())
            .await
            .with_context(|| format!("Failed to connect to {url}"))?;
        info!("Connected to coordinator as {}", self.config.builder_id);

        let (mut sink, mut stream) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<BuilderMessage>();

        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        error!("Could not encode message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(json.into())).await {
                    warn!("Could not write to coordinator: {}", e);
                    break;
                }
            }
        });

        let mut current: Option<JoinHandle<BuildStatus>> = None;

        while let Some(frame) = stream.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text.as_str().to_string(),
                Ok(Message::Binary(data)) => String::from_utf8_lossy(&data).into_owned(),
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    warn!("WebSocket error: {}", e);
                    break;
                }
            };

            match serde_json::from_str::<CoordinatorMessage>(&text) {
                Ok(CoordinatorMessage::Command(command)) => {
                    if current.as_ref().is_some_and(|build| !build.is_finished()) {
                        warn!(
                            "Ignoring command for build {} while another build runs",
                            command.build.id
                        );
                        continue;
                    }

                    debug!("Received command for build {}", command.build.id);
                    let execution = Arc::clone(&self.execution);
                    let sender = tx.clone();
                    current = Some(tokio::spawn(async move {
                        execution.execute(*command, sender).await
                    }));
                }
                Err(e) => warn!("Ignoring message from coordinator: {}", e),
            }
        }

        drop(tx);

        // Containers of a running build are cleaned up by the build itself
        if let Some(build) = current {
            if !build.is_finished() {
                info!("Waiting for the running build to finish");
            }
            if let Err(e) = build.await {
                warn!("Build task panicked: {}", e);
            }
        }

        writer.abort();
        Ok(())
    }
}
