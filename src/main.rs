//! xa_bank - Cross-Shard Transfer Coordinator
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌─────────────┐    ┌──────────┐
//! │  Config  │───▶│  Shards  │───▶│ Coordinator │───▶│ Gateway  │
//! │  (YAML)  │    │ (XA RMs) │    │ (one slot)  │    │  (HTTP)  │
//! └──────────┘    └──────────┘    └─────────────┘    └──────────┘
//! ```
//!
//! Usage: `xa_bank [--env <name>] [--port <port>]`

use std::sync::Arc;

use anyhow::Context;

use xa_bank::config::AppConfig;
use xa_bank::gateway::{self, state::AppState};
use xa_bank::logging::init_logging;
use xa_bank::shard::ShardRegistry;
use xa_bank::transfer::TransferCoordinator;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Get port override from command line (--port argument)
fn get_port_override() -> anyhow::Result<Option<u16>> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            let port = args[i + 1]
                .parse()
                .with_context(|| format!("Invalid --port value: {}", args[i + 1]))?;
            return Ok(Some(port));
        }
    }
    Ok(None)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)?;
    let _log_guard = init_logging(&app_config);

    tracing::info!(env = %env, shards = app_config.shards.len(), "Starting xa_bank");

    let shards = ShardRegistry::connect(&app_config.shards)
        .await
        .context("Failed to open shards")?;
    let coordinator = Arc::new(TransferCoordinator::with_timeout(
        Arc::new(shards),
        app_config.coordinator.branch_timeout(),
    ));

    let port = get_port_override()?.unwrap_or(app_config.gateway.port);
    let state = Arc::new(AppState::new(coordinator));
    gateway::run_server(&app_config.gateway.host, port, state).await
}
