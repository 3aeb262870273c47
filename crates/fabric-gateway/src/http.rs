//! HTTP transport front.
//!
//! | Method | Path                   | Description                              |
//! |--------|------------------------|------------------------------------------|
//! | `POST` | `/mcp/call`            | `{name, arguments}` call (JSON or SSE)   |
//! | `GET`  | `/health`              | Liveness probe                           |
//! | `GET`  | `/mcp/list_agents`     | Convenience for `fabric.agent.list`      |
//! | `POST` | `/mcp/register_agent`  | Convenience for `fabric.agent.register`  |
//! | `GET`  | `/mcp/agent/{id}`      | Convenience for `fabric.agent.describe`  |
//! | `GET`  | `/mcp/list_tools`      | Convenience for `fabric.tool.list`       |
//! | `GET`  | `/mcp/list_topics`     | Convenience for `fabric.message.topics`  |
//! | `GET`  | `/mcp/metrics`         | Prometheus text metrics                  |
//!
//! Streaming responses use `text/event-stream` framing: one
//! `data: <json>\n\n` per event, terminated by a `final` event.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use fabric_kernel::envelope::StreamEvent;
use fabric_kernel::error::{ErrorCode, FabricError};
use fabric_kernel::trace::TraceContext;
use fabric_kernel::wire::WireResponse;

use crate::middleware::RateLimiter;
use crate::pipeline::{Credential, FabricPipeline};

/// HTTP front configuration.
#[derive(Debug, Clone)]
pub struct HttpFrontConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
    pub rate_max_requests: u64,
    pub rate_window: Duration,
}

impl Default for HttpFrontConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            enable_cors: true,
            rate_max_requests: 300,
            rate_window: Duration::from_secs(60),
        }
    }
}

impl HttpFrontConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        format!("{}:{}", self.host, self.port)
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], self.port)))
    }
}

/// State shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<FabricPipeline>,
    pub rate_limiter: Arc<RateLimiter>,
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn client_key(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn envelope_response(response: WireResponse) -> Response {
    let status =
        StatusCode::from_u16(response.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(response)).into_response()
}

fn rate_limited_response(arguments: &serde_json::Value) -> Response {
    let trace = TraceContext::from_arguments(arguments);
    let err = FabricError::new(ErrorCode::RateLimited, "Too many requests");
    envelope_response(WireResponse::failure(trace, &err))
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct McpCallBody {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

/// POST /mcp/call — the canonical entry point.
async fn mcp_call(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<McpCallBody>,
) -> Response {
    if !state.rate_limiter.check(&client_key(&headers)) {
        return rate_limited_response(&body.arguments);
    }
    let credential = Credential::Bearer(bearer_token(&headers));

    let wants_stream = body
        .arguments
        .get("stream")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    if wants_stream {
        match state
            .pipeline
            .handle_stream(&body.name, body.arguments, credential)
            .await
        {
            Ok(events) => {
                let sse_stream = events.map(|item| {
                    let event = match item {
                        Ok(event) => event,
                        // The terminal-final wrapper converts upstream errors,
                        // so this arm is a last-resort guard.
                        Err(err) => StreamEvent::final_err(&err, &TraceContext::root()),
                    };
                    Ok::<Event, std::convert::Infallible>(
                        Event::default().data(
                            serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string()),
                        ),
                    )
                });
                Sse::new(sse_stream)
                    .keep_alive(KeepAlive::default())
                    .into_response()
            }
            Err(failure) => envelope_response(*failure),
        }
    } else {
        let response = state
            .pipeline
            .handle(&body.name, body.arguments, credential)
            .await;
        envelope_response(response)
    }
}

/// GET /health — liveness; reachable without credentials.
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": state.pipeline.version(),
    }))
}

/// GET /mcp/metrics — Prometheus text exposition (bearer-authenticated).
async fn metrics(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(err) = state.pipeline.auth().verify_bearer(bearer_token(&headers)) {
        return envelope_response(WireResponse::failure(TraceContext::root(), &err));
    }
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        state.pipeline.metrics().render(),
    )
        .into_response()
}

/// Thin REST conveniences: each synthesizes the equivalent `fabric.*` call.
async fn list_agents(State(state): State<AppState>, headers: HeaderMap) -> Response {
    forward(&state, &headers, "fabric.agent.list", serde_json::json!({})).await
}

async fn register_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    forward(&state, &headers, "fabric.agent.register", body).await
}

async fn describe_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    forward(
        &state,
        &headers,
        "fabric.agent.describe",
        serde_json::json!({ "agent_id": agent_id }),
    )
    .await
}

async fn list_tools(State(state): State<AppState>, headers: HeaderMap) -> Response {
    forward(&state, &headers, "fabric.tool.list", serde_json::json!({})).await
}

async fn list_topics(State(state): State<AppState>, headers: HeaderMap) -> Response {
    forward(&state, &headers, "fabric.message.topics", serde_json::json!({})).await
}

async fn forward(
    state: &AppState,
    headers: &HeaderMap,
    name: &str,
    arguments: serde_json::Value,
) -> Response {
    if !state.rate_limiter.check(&client_key(headers)) {
        return rate_limited_response(&arguments);
    }
    let response = state
        .pipeline
        .handle(name, arguments, Credential::Bearer(bearer_token(headers)))
        .await;
    envelope_response(response)
}

// ─────────────────────────────────────────────────────────────────────────────
// Router / server
// ─────────────────────────────────────────────────────────────────────────────

/// Build the axum router without binding a socket. Integration tests drive
/// this directly via `tower::ServiceExt`.
pub fn build_router(pipeline: Arc<FabricPipeline>, config: &HttpFrontConfig) -> Router {
    let rate_limiter = Arc::new(RateLimiter::new(
        config.rate_max_requests,
        config.rate_window,
    ));

    // Background GC keeps the limiter's client map bounded.
    let gc_limiter = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(120));
        loop {
            interval.tick().await;
            gc_limiter.gc();
        }
    });

    let state = AppState {
        pipeline,
        rate_limiter,
    };

    let mut router = Router::new()
        .route("/mcp/call", post(mcp_call))
        .route("/health", get(health))
        .route("/mcp/list_agents", get(list_agents))
        .route("/mcp/register_agent", post(register_agent))
        .route("/mcp/agent/{id}", get(describe_agent))
        .route("/mcp/list_tools", get(list_tools))
        .route("/mcp/list_topics", get(list_topics))
        .route("/mcp/metrics", get(metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers(Any);
        router = router.layer(cors);
    }

    router
}

/// Bind and serve until the process exits.
pub async fn serve(pipeline: Arc<FabricPipeline>, config: HttpFrontConfig) -> anyhow::Result<()> {
    let addr = config.socket_addr();
    let router = build_router(pipeline, &config);
    info!("fabric gateway HTTP front listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}
