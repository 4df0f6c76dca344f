//! HTTP routes.
//!
//! | Method | Path | Body |
//! |---|---|---|
//! | GET | `/` | service banner |
//! | GET | `/health` | `{"status": "ok"}` |
//! | GET | `/api/models` | candidate list and the one tried first |
//! | POST | `/api/chat`, `/chat` | `{response, model}` |
//! | POST | `/api/chat/stream`, `/chat/stream` | SSE, one JSON `ChatEvent` per `data:` line |

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use futures_util::StreamExt;
use serde_json::json;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use super::middleware::rate_limit;
use crate::gateway::ChatGateway;
use crate::limiter::RateLimiter;
use crate::types::{ChatEvent, ChatRequest};
use crate::{HuginnError, Result};

/// Shown to callers when every model candidate failed.
pub const OVERLOAD_MESSAGE: &str =
    "The assistant is currently overloaded. Please try again in a minute.";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<ChatGateway>,
    pub limiter: Arc<RateLimiter>,
}

/// Build the application router.
pub fn router(state: AppState, cors: CorsLayer) -> Router {
    let limiter = state.limiter.clone();
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/models", get(models))
        .route("/api/chat", post(chat))
        .route("/chat", post(chat))
        .route("/api/chat/stream", post(chat_stream))
        .route("/chat/stream", post(chat_stream))
        .with_state(state)
        .layer(middleware::from_fn_with_state(limiter, rate_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// CORS policy from the configured origins. `"*"` allows any origin.
pub fn cors_layer(origins: &[String]) -> Result<CorsLayer> {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        return Ok(base.allow_origin(Any));
    }

    let parsed = origins
        .iter()
        .map(|o| {
            HeaderValue::from_str(o).map_err(|e| {
                HuginnError::Configuration(format!("invalid allowed origin {o:?}: {e}"))
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(base.allow_origin(AllowOrigin::list(parsed)))
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "message": "Huginn chat gateway is running",
        "status": "running",
        "version": crate::version::version_string(),
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn models(State(state): State<AppState>) -> Json<serde_json::Value> {
    let chain = state.gateway.chain();
    Json(json!({
        "candidates": chain.candidates(),
        "next": chain.next_candidate(),
    }))
}

async fn chat(
    State(state): State<AppState>,
    body: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };

    match state.gateway.chat(&request).await {
        Ok(reply) => Json(reply).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn chat_stream(
    State(state): State<AppState>,
    body: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };

    let events = match state.gateway.chat_stream(&request).await {
        Ok(events) => events,
        Err(e) => return ApiError(e).into_response(),
    };

    let frames = events.map(|event| Ok::<Event, Infallible>(sse_frame(&event)));
    let mut response = Sse::new(frames)
        .keep_alive(KeepAlive::default())
        .into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}

fn sse_frame(event: &ChatEvent) -> Event {
    match serde_json::to_string(event) {
        Ok(json) => Event::default().data(json),
        Err(e) => {
            error!("failed to encode chat event: {e}");
            Event::default().data(r#"{"type":"error","message":"failed to encode event"}"#)
        }
    }
}

fn bad_body(rejection: JsonRejection) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": rejection.body_text() })),
    )
        .into_response()
}

/// HTTP rendering of a [`HuginnError`].
pub struct ApiError(pub HuginnError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            HuginnError::InvalidInput(_)
            | HuginnError::ContentBlocked { .. }
            | HuginnError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            HuginnError::AllModelsExhausted { .. } => StatusCode::BAD_GATEWAY,
            HuginnError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self.0 {
            HuginnError::AllModelsExhausted { attempted, last } => {
                warn!(attempted, error = %last, "all model candidates failed");
                (
                    status,
                    Json(json!({ "error": OVERLOAD_MESSAGE, "detail": last.to_string() })),
                )
                    .into_response()
            }
            HuginnError::RateLimited { retry_after } => {
                let secs = (retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0)).max(1);
                let mut response = (
                    status,
                    Json(json!({
                        "error": "Too many requests. Please slow down.",
                        "retry_after_secs": secs,
                    })),
                )
                    .into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(secs));
                response
            }
            HuginnError::ContentBlocked { reason } => (
                status,
                Json(json!({ "error": format!("Message was blocked by the content filter ({reason})") })),
            )
                .into_response(),
            err @ (HuginnError::Configuration(_) | HuginnError::AuthenticationFailed) => {
                error!(error = %err, "gateway misconfigured");
                (
                    status,
                    Json(json!({ "error": "Server configuration error: API key missing or invalid" })),
                )
                    .into_response()
            }
            other => {
                if status.is_server_error() {
                    error!(error = %other, "request failed");
                }
                (status, Json(json!({ "error": other.to_string() }))).into_response()
            }
        }
    }
}
