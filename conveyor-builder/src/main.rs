//! Conveyor Builder
//!
//! A worker that runs build commands in containers.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Session: WebSocket connection to the coordinator, reconnecting with backoff
//! - Services: Build execution (parameters, step ordering)
//! - Steps: Run, build and stack steps on top of the container engine
//!
//! The builder receives one command at a time, runs its steps in order and
//! streams every output line back to the coordinator as it is produced.

mod checkout;
mod config;
mod emitter;
mod engine;
mod error;
mod params;
mod service;
mod session;
mod step;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::engine::DockerEngine;
use crate::service::{ExecutionService, StandardExecutionService};
use crate::session::BuilderSession;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conveyor_builder=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Conveyor Builder");

    // Load configuration
    let config = load_config()?;
    info!(
        "Loaded configuration: builder_id={}, coordinator_url={}",
        config.builder_id, config.coordinator_url
    );

    let engine = DockerEngine::connect().context("Failed to connect to Docker")?;
    engine
        .check_available()
        .await
        .context("Docker is not available")?;

    let execution: Arc<dyn ExecutionService> =
        Arc::new(StandardExecutionService::new(Arc::new(engine), &config));

    info!("Builder initialized successfully");

    let session = BuilderSession::new(config, execution);

    tokio::select! {
        result = session.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    }
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<Config> {
    match Config::from_env() {
        Ok(config) => {
            config.validate()?;
            Ok(config)
        }
        Err(e) => {
            info!("{}, using defaults", e);
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}
