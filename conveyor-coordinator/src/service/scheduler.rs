//! Dispatch loop
//!
//! Pairs pending builds (oldest first) with ready builders. Runs on every
//! tick of the dispatch interval and whenever it is woken because a build
//! was queued or a builder became ready.

use std::time::Duration;

use tokio::time;
use tracing::{debug, error, info, warn};

use crate::service::dispatch::{DispatchError, dispatch};
use crate::repository::build_repository;
use crate::state::AppState;

/// Runs until a fatal dispatch error occurs
pub async fn run(state: AppState, interval: Duration) -> Result<(), DispatchError> {
    info!("Starting dispatch loop (interval: {:?})", interval);

    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = state.wake.notified() => {}
        }

        match dispatch_once(&state).await {
            Ok(0) => {}
            Ok(count) => info!("Dispatched {} build(s) this cycle", count),
            Err(e) if e.is_fatal() => {
                error!("Stopping dispatch loop: {}", e);
                return Err(e);
            }
            Err(e) => warn!("Error during dispatch cycle: {}", e),
        }
    }
}

/// Performs a single matching pass; returns the number of dispatched builds
pub async fn dispatch_once(state: &AppState) -> Result<usize, DispatchError> {
    let pending = build_repository::list_pending(state.store()).await?;
    if pending.is_empty() {
        return Ok(0);
    }

    let ready = state.builders.ready_builders().await;
    if ready.is_empty() {
        debug!("{} build(s) waiting for a builder", pending.len());
        return Ok(0);
    }

    let mut dispatched = 0;
    let mut builds = pending.into_iter();

    for builder_id in ready {
        let Some(build) = builds.next() else {
            break;
        };

        match dispatch(state, &builder_id, build.id).await {
            Ok(_) => dispatched += 1,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!("Could not dispatch build {} to {}: {}", build.id, builder_id, e),
        }
    }

    Ok(dispatched)
}
