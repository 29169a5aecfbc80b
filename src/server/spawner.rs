// src/server/spawner.rs

//! Spawns the daemon's auxiliary background tasks.

use super::context::ServerContext;
use super::metrics_server;

pub fn spawn_all(ctx: &mut ServerContext) {
    if ctx.metrics_enabled {
        let state = ctx.state.clone();
        let shutdown_rx = ctx.state.shutdown_tx.subscribe();
        tokio::spawn(metrics_server::run_metrics_server(state, shutdown_rx));
    }
}
