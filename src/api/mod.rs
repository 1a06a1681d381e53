use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::OriginalUri;
use axum::http::{
    header::{HeaderName, ACCEPT, AUTHORIZATION, CONTENT_TYPE, ORIGIN},
    Request, StatusCode,
};
use axum::response::IntoResponse;
use axum::response::Response;
use axum::{Json, Router};
use once_cell::sync::Lazy;
use serde_json::json;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, info_span};

use crate::core::time::now_rfc3339;
use crate::services::agent_controller::AgentController;
use crate::services::chat_client::ChatBackend;
use crate::utils::event_bus::EventBus;

static START_TIME: Lazy<Instant> = Lazy::new(Instant::now);
static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

pub mod agents;
pub mod token;
pub mod webhook;

#[derive(Clone)]
pub struct AppState {
    pub controller: AgentController,
    pub chat: Arc<dyn ChatBackend>,
    pub events: EventBus,
    pub webhook_secret: Arc<str>,
}

pub fn router(state: AppState, cors_origins: &[String]) -> Router {
    let allowed_headers = [
        ACCEPT,
        AUTHORIZATION,
        CONTENT_TYPE,
        ORIGIN,
        HeaderName::from_static("x-requested-with"),
        HeaderName::from_static("x-signature"),
        HeaderName::from_static("x-request-id"),
    ];

    let cors = if cors_origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_headers(allowed_headers)
            .allow_methods(Any)
            .allow_credentials(false)
    } else {
        let origins = cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect::<Vec<_>>();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_headers(allowed_headers)
            .allow_methods(Any)
            .allow_credentials(true)
    };

    let trace = TraceLayer::new_for_http()
        .make_span_with(|req: &Request<Body>| {
            let request_id = header_value(req, &REQUEST_ID_HEADER);
            info_span!(
                "http.request",
                method = %req.method(),
                uri = %req.uri(),
                version = ?req.version(),
                request_id = %request_id
            )
        })
        .on_request(|_req: &Request<Body>, _span: &tracing::Span| {
            info!("request.start");
        })
        .on_response(
            |res: &Response, latency: std::time::Duration, _span: &tracing::Span| {
                info!(status = %res.status(), latency_ms = %latency.as_millis(), "request.end");
            },
        )
        .on_failure(|err, latency: std::time::Duration, _span: &tracing::Span| {
            tracing::error!(error = %err, latency_ms = %latency.as_millis(), "request.failure");
        });

    Router::new()
        .merge(agents::router())
        .merge(token::router())
        .merge(webhook::router())
        .route("/health", axum::routing::get(health))
        .route("/", axum::routing::get(root))
        .fallback(fallback_404)
        .with_state(state)
        .layer(cors)
        .layer(trace)
        .layer(PropagateRequestIdLayer::new(REQUEST_ID_HEADER.clone()))
        .layer(SetRequestIdLayer::new(
            REQUEST_ID_HEADER.clone(),
            MakeRequestUuid,
        ))
}

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "timestamp": now_rfc3339(),
        "uptime": START_TIME.elapsed().as_secs_f64()
    }))
}

async fn root() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "name": "Chat AI Relay",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Relays AI assistant responses into chat channels",
        "endpoints": {
            "health": "/health",
            "agent_status": "/agent-status",
            "start_agent": "/start-ai-agent",
            "stop_agent": "/stop-ai-agent",
            "token": "/token",
            "webhook": "/webhook"
        }
    }))
}

async fn fallback_404(uri: OriginalUri) -> impl IntoResponse {
    let path = uri.0.path().to_string();
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": {
                "message": "Resource not found",
                "path": path
            }
        })),
    )
}

/// Unreadable or absent JSON bodies decode as an empty request so the
/// handler reports its own missing-field error.
pub(crate) fn body_or_default<T: Default>(payload: Result<Json<T>, JsonRejection>) -> T {
    match payload {
        Ok(Json(body)) => body,
        Err(rejection) => {
            debug!("request body rejected: {}", rejection.body_text());
            T::default()
        }
    }
}

fn header_value(req: &Request<Body>, name: &HeaderName) -> String {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::services::agent::AgentFactory;
    use crate::services::agent_registry::AgentRegistry;
    use crate::services::testing::FakeChat;

    pub const WEBHOOK_SECRET: &str = "webhook-secret";

    pub fn state(chat: Arc<FakeChat>, factory: Arc<dyn AgentFactory>) -> AppState {
        AppState {
            controller: AgentController::new(AgentRegistry::new(), chat.clone(), factory),
            chat,
            events: EventBus::default(),
            webhook_secret: Arc::from(WEBHOOK_SECRET),
        }
    }

    pub fn app(state: AppState) -> Router {
        router(state, &["*".to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use axum::body::to_bytes;
    use tower::ServiceExt;

    use crate::services::testing::{FakeChat, FakeFactory};

    #[tokio::test]
    async fn health_reports_ok_and_echoes_request_id() {
        let app = app(state(
            Arc::new(FakeChat::default()),
            Arc::new(FakeFactory::default()),
        ));

        let res = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().contains_key("x-request-id"));
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["status"], "ok");
    }

    #[tokio::test]
    async fn unknown_route_returns_json_404() {
        let app = app(state(
            Arc::new(FakeChat::default()),
            Arc::new(FakeFactory::default()),
        ));

        let res = app
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"]["path"], "/nope");
    }
}
