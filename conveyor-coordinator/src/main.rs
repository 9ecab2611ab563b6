use std::future::IntoFuture;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod broker;
pub mod config;
pub mod db;
pub mod locks;
pub mod repository;
pub mod service;
pub mod state;

use config::Config;
use repository::{KvStore, MemoryStore, PgStore};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conveyor_coordinator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Conveyor Coordinator...");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate()?;

    let store: Arc<dyn KvStore> = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let pool = db::create_pool(url)
                .await
                .context("Failed to create database pool")?;
            db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, records are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let state = AppState::new(store, config.event_buffer);

    if let Some(path) = &config.catalog_path {
        let tasks = service::catalog_service::load_catalog(&state, path).await?;
        tracing::info!("Loaded {} task(s) from {}", tasks, path.display());
    }

    let app = api::create_router(state.clone());

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    let dispatcher = service::scheduler::run(state, config.dispatch_interval);

    tokio::select! {
        served = axum::serve(listener, app).into_future() => {
            served.context("Server stopped")?;
        }
        dispatched = dispatcher => {
            // Only a fatal error ends the loop
            dispatched.context("Dispatch loop stopped")?;
        }
    }

    Ok(())
}
