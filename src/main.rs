// src/main.rs

//! The main entry point for the mlagd control-plane daemon.

use anyhow::Result;
use mlagd::config::Config;
use mlagd::server;
use std::env;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::{filter::EnvFilter, prelude::*, reload};

#[tokio::main]
async fn main() -> Result<()> {
    run_app().await
}

async fn run_app() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("mlagd version {VERSION}");
        return Ok(());
    }

    // Determine the configuration path. It can be provided via a --config
    // flag; otherwise, it defaults to "mlagd.toml".
    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("mlagd.toml");

    // The daemon cannot run without a valid configuration.
    let mut config = match Config::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e}");
            std::process::exit(1);
        }
    };

    // Override the local peer id if provided as a command-line argument.
    if let Some(idx) = args.iter().position(|arg| arg == "--peer-id") {
        if let Some(id_str) = args.get(idx + 1) {
            match id_str.parse::<u8>() {
                Ok(id) => config.peer_id = id,
                Err(_) => {
                    eprintln!("Invalid peer id: {id_str}");
                    std::process::exit(1);
                }
            }
        } else {
            eprintln!("--peer-id flag requires a value");
            std::process::exit(1);
        }
    }

    // Setup logging with reloading capabilities. The verbosity of a running
    // daemon can be changed through the management surface, so the filter
    // layer is wrapped in a reload handle.
    let initial_log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());

    let (filter, reload_handle) = reload::Layer::new(EnvFilter::new(initial_log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact().with_ansi(true))
        .init();

    let reload_handle = Arc::new(reload_handle);

    if let Err(e) = server::run(config, reload_handle).await {
        error!("Daemon runtime error: {}", e);
        return Err(e);
    }

    Ok(())
}
