// src/server/initialization.rs

//! Handles daemon initialization: shared state, the HAL binding, and the
//! orchestrator with its two dispatcher services.

use super::context::ServerContext;
use crate::config::Config;
use crate::core::hal::mock::RecordingHal;
use crate::core::orchestrator::Orchestrator;
use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{filter::EnvFilter, reload};

pub fn setup(
    config: Config,
    log_reload_handle: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
) -> Result<ServerContext> {
    let metrics_enabled = config.metrics.enabled;
    if config.peers.is_empty() {
        warn!("no peers configured; the daemon will run standalone");
    }

    // Without switch silicon underneath, the daemon drives the recording
    // HAL. A platform build links its own `Hal` implementation here.
    let hal = Arc::new(RecordingHal::new());

    let orchestrator = Orchestrator::start(config, hal)?;
    let state = orchestrator.state().clone();
    state.set_log_reload_handle(log_reload_handle);

    info!(peer_id = state.local_peer(), "daemon state initialized");

    Ok(ServerContext {
        state,
        orchestrator,
        metrics_enabled,
    })
}
