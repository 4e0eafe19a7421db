use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;

use crate::transfer::{self, GlobalTransaction, TransferError, TransferErrorBody};

use super::state::AppState;

/// GET /
pub async fn hello() -> Json<serde_json::Value> {
    Json(json!({ "msg": "Hello world" }))
}

/// GET /transferencia/{origin}/{destination}/{amount}
pub async fn transfer(
    State(state): State<Arc<AppState>>,
    Path((origin, destination, amount)): Path<(String, String, String)>,
) -> Response {
    tracing::info!(
        origin = %origin,
        destination = %destination,
        amount = %amount,
        "Transfer request"
    );

    match transfer::api::transfer(&state.coordinator, &origin, &destination, &amount).await {
        Ok(resp) => (StatusCode::OK, Json(resp)).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Every failure is a 500 carrying the error kind and message
fn error_response(e: &TransferError) -> Response {
    if e.is_validation() {
        tracing::warn!(kind = e.kind(), error = %e, "Transfer rejected");
    } else {
        tracing::error!(kind = e.kind(), error = %e, "Transfer failed");
    }
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(TransferErrorBody::from(e)),
    )
        .into_response()
}

/// Health check response data
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Number of configured shards
    pub shards: usize,
    /// In-flight global transaction, if any
    pub active_transaction: Option<GlobalTransaction>,
}

/// GET /api/v1/health
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        shards: state.coordinator.shards().len(),
        active_transaction: state.coordinator.active_transaction(),
    })
}
