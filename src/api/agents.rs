use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::{
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::core::validation::normalize_non_empty;

use super::{body_or_default, AppState};

#[derive(Debug, Deserialize)]
struct StatusQuery {
    channel_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StartAgentRequest {
    channel_id: Option<String>,
    channel_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StopAgentRequest {
    channel_id: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/agent-status", get(agent_status))
        .route("/start-ai-agent", post(start_agent))
        .route("/stop-ai-agent", post(stop_agent))
}

async fn agent_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> (StatusCode, Json<Value>) {
    let Some(channel_id) = normalize_non_empty(query.channel_id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Missing channel_id"})),
        );
    };
    let status = state.controller.status(&channel_id);
    (StatusCode::OK, Json(json!({"status": status})))
}

async fn start_agent(
    State(state): State<AppState>,
    payload: Result<Json<StartAgentRequest>, JsonRejection>,
) -> (StatusCode, Json<Value>) {
    let req = body_or_default(payload);
    let Some(channel_id) = normalize_non_empty(req.channel_id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Missing required fields"})),
        );
    };

    match state
        .controller
        .start(&channel_id, req.channel_type.as_deref())
        .await
    {
        Ok(outcome) => {
            info!("start-ai-agent channel={} outcome={:?}", channel_id, outcome);
            (
                StatusCode::OK,
                Json(json!({"message": "AI agent started", "data": []})),
            )
        }
        Err(err) if err.is_validation() => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": err.to_string()})),
        ),
        Err(err) => {
            error!("start-ai-agent failed: channel={} error={}", channel_id, err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Failed to start AI Agent", "reason": err.to_string()})),
            )
        }
    }
}

async fn stop_agent(
    State(state): State<AppState>,
    payload: Result<Json<StopAgentRequest>, JsonRejection>,
) -> (StatusCode, Json<Value>) {
    let req = body_or_default(payload);
    let Some(channel_id) = normalize_non_empty(req.channel_id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Missing channel_id"})),
        );
    };

    match state.controller.stop(&channel_id).await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({"message": "AI agent stopped", "data": []})),
        ),
        Err(err) => {
            error!("stop-ai-agent failed: channel={} error={}", channel_id, err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Failed to stop AI Agent", "reason": err.to_string()})),
            )
        }
    }
}
