//! Inbound HTTP surface of a node: the coordinator's push endpoint plus
//! a liveness probe. The push handler validates, hands off to the
//! agent, and returns; it never blocks on the lifecycle loop.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use tracing::warn;

use swarmlearn_core::{ApiResponse, ModelPush, NodeAgent};

pub fn app_router(agent: Arc<NodeAgent>) -> Router {
    Router::new()
        .route("/model_update", post(model_update_handler))
        .route("/health", get(health_handler))
        .with_state(agent)
}

pub async fn model_update_handler(
    State(agent): State<Arc<NodeAgent>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<ApiResponse>) {
    // A null global_model is a valid "start from scratch" push; anything
    // else malformed is rejected here before it reaches the agent.
    let push: ModelPush = match serde_json::from_value(body) {
        Ok(push) => push,
        Err(e) => {
            warn!(error = %e, "invalid_model_push_payload");
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::failure("missing or invalid round_number/global_model")),
            );
        }
    };
    let round = push.round_number;
    agent.apply_pushed_model(push);
    (StatusCode::OK, Json(ApiResponse::success(format!("model for round {round} accepted"))))
}

pub async fn health_handler(State(agent): State<Arc<NodeAgent>>) -> Json<Value> {
    Json(serde_json::json!({
        "node_id": agent.node_id(),
        "phase": agent.phase(),
    }))
}
