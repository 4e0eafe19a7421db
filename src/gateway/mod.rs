//! HTTP Gateway
//!
//! Thin request layer over the transfer coordinator:
//!
//! - `GET /` greeting
//! - `GET /transferencia/{origin}/{destination}/{amount}` run one transfer
//! - `GET /api/v1/health` shard count and in-flight transaction

pub mod handlers;
pub mod state;

use std::sync::Arc;

use axum::{Router, routing::get};
use tokio::net::TcpListener;

use state::AppState;

/// Build the gateway router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::hello))
        .route(
            "/transferencia/{origin}/{destination}/{amount}",
            get(handlers::transfer),
        )
        .route("/api/v1/health", get(handlers::health_check))
        .with_state(state)
}

/// Bind and serve until the process is stopped
pub async fn run_server(host: &str, port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = router(state);

    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {}: {} (port {} may already be in use)",
            addr,
            e,
            port
        )
    })?;

    tracing::info!(addr = %addr, "🚀 Gateway listening");
    println!("🚀 Gateway listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
