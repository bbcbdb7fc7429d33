//! Keyroom Monitor
//!
//! Runs a simulated piano room and shows the local player's latency view.
//!
//! Usage:
//!   cargo run --release
//!   cargo run --release -- --no-dashboard      # Plain logging mode
//!   cargo run --release -- --players 6         # Room size, local player included
//!   cargo run --release -- --config sync.json  # Synchronizer settings

mod dashboard;
mod metrics;
mod simulation;

use keyroom_core::SyncConfig;
use parking_lot::RwLock;
use std::sync::Arc;

const DEFAULT_PLAYERS: usize = 4;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let use_dashboard = !args.contains(&"--no-dashboard".to_string());

    let players = match flag_value(&args, "--players") {
        Some(value) => value.parse::<usize>()?,
        None => DEFAULT_PLAYERS,
    }
    .clamp(2, simulation::MAX_PLAYERS);

    let config = match flag_value(&args, "--config") {
        Some(path) => SyncConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => SyncConfig::default(),
    }
    .with_env_overrides()?;

    // Shared metrics state
    let metrics = Arc::new(RwLock::new(metrics::Metrics::new(config)));

    if use_dashboard {
        // Run with TUI dashboard
        dashboard::run(metrics, players).await
    } else {
        // Run with plain logging
        keyroom_core::logging::init_tracing("info");
        simulation::run_with_logging(metrics, players).await
    }
}

/// Value following `flag` on the command line
fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}
