use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::{routing::post, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

use crate::core::time::now_secs;
use crate::core::validation::normalize_non_empty;

use super::{body_or_default, AppState};

/// Lifetime of issued user tokens.
pub const TOKEN_TTL_SECS: i64 = 60 * 60;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest {
    user_id: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/token", post(issue_token))
}

async fn issue_token(
    State(state): State<AppState>,
    payload: Result<Json<TokenRequest>, JsonRejection>,
) -> (StatusCode, Json<Value>) {
    let req = body_or_default(payload);
    let Some(user_id) = normalize_non_empty(req.user_id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "userId is required"})),
        );
    };

    let issued_at = now_secs();
    match state
        .chat
        .create_token(&user_id, issued_at + TOKEN_TTL_SECS, issued_at)
    {
        Ok(token) => (StatusCode::OK, Json(json!({"token": token}))),
        Err(err) => {
            error!("token generation failed: user={} error={}", user_id, err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Failed to generate token"})),
            )
        }
    }
}
