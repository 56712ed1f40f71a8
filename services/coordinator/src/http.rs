//! HTTP surface of the coordinator.
//!
//! - `POST /register`            — node registration
//! - `POST /submit_model_update` — per-round update submission
//! - `GET  /status`              — round/registry snapshot
//! - `GET  /ledger/:round`       — committed aggregation record
//!
//! All state reaches handlers through injected `AppState`; malformed
//! payloads are rejected at this boundary with an explicit failure body
//! before touching protocol logic.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use tracing::warn;

use swarmlearn_core::{
    ApiResponse, LedgerClient, RegisterRequest, RoundCoordinator, SubmitUpdateRequest,
};

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<RoundCoordinator>,
    pub ledger: Arc<dyn LedgerClient>,
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/register", post(register_handler))
        .route("/submit_model_update", post(submit_update_handler))
        .route("/status", get(status_handler))
        .route("/ledger/:round", get(ledger_handler))
        .with_state(state)
}

pub async fn register_handler(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<ApiResponse>) {
    let req: RegisterRequest = match serde_json::from_value(body) {
        Ok(req) => req,
        Err(e) => {
            warn!(error = %e, "invalid_registration_payload");
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::failure("missing or invalid node_id/endpoint")),
            );
        }
    };
    if req.node_id.is_empty() || req.endpoint.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::failure("node_id and endpoint must be non-empty")),
        );
    }
    state.coordinator.register_node(&req.node_id, &req.endpoint);
    (
        StatusCode::OK,
        Json(ApiResponse::success(format!("node {} registered", req.node_id))),
    )
}

pub async fn submit_update_handler(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<ApiResponse>) {
    let req: SubmitUpdateRequest = match serde_json::from_value(body) {
        Ok(req) => req,
        Err(e) => {
            warn!(error = %e, "invalid_update_payload");
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::failure(
                    "missing or invalid node_id/round_number/parameters",
                )),
            );
        }
    };
    match state
        .coordinator
        .receive_update(&req.node_id, req.round_number, req.parameters)
    {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse::success(format!(
                "update from {} received for round {}",
                req.node_id, req.round_number
            ))),
        ),
        Err(e) => (StatusCode::BAD_REQUEST, Json(ApiResponse::failure(e.to_string()))),
    }
}

pub async fn status_handler(State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::json!(state.coordinator.status()))
}

pub async fn ledger_handler(
    State(state): State<AppState>,
    Path(round): Path<u64>,
) -> Result<Json<Value>, (StatusCode, Json<ApiResponse>)> {
    match state.ledger.query(round).await {
        Ok(Some(record)) => Ok(Json(serde_json::json!(record))),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(ApiResponse::failure(format!("no record for round {round}"))),
        )),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::failure(e.to_string())),
        )),
    }
}
