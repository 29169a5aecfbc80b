// src/server/mod.rs

use crate::config::Config;
use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, reload};

mod context;
mod initialization;
mod metrics_server;
mod spawner;

pub use context::ServerContext;

/// The main daemon startup function, orchestrating all setup phases.
pub async fn run(
    config: Config,
    log_reload_handle: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
) -> Result<()> {
    // 1. Initialize shared state, the HAL, and the orchestrator.
    let mut server_context = initialization::setup(config, log_reload_handle)?;

    // 2. Spawn auxiliary background tasks.
    spawner::spawn_all(&mut server_context);

    // 3. Run until interrupted, then shut down in order.
    tokio::signal::ctrl_c().await?;
    info!("interrupt received, shutting down");
    server_context.orchestrator.stop().await?;

    Ok(())
}
