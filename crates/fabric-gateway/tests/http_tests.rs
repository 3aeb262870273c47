//! HTTP front behavior driven through the router with `tower::ServiceExt`.

mod common;

use common::{agent, pipeline_with, Behavior, TEST_PSK};
use serde_json::json;
use tower::ServiceExt;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;

use fabric_gateway::http::{build_router, HttpFrontConfig};
use fabric_kernel::trace::TraceContext;

async fn router() -> Router {
    let pipeline = pipeline_with(vec![(
        agent("thinker", "Thinker", &[("reason", false), ("narrate", true)]),
        Behavior::Stream(vec![
            fabric_kernel::envelope::StreamEvent::status("starting", &TraceContext::root()),
            fabric_kernel::envelope::StreamEvent::final_ok(json!({"done": true}), &TraceContext::root()),
        ]),
    )])
    .await;
    build_router(pipeline, &HttpFrontConfig::default())
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn mcp_call(name: &str, arguments: serde_json::Value, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/mcp/call")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder
        .body(Body::from(
            json!({ "name": name, "arguments": arguments }).to_string(),
        ))
        .unwrap()
}

#[tokio::test]
async fn health_is_open_and_versioned() {
    let router = router().await;
    let response = router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert!(body["version"].as_str().unwrap().starts_with("fabric-gw-"));
}

// Scenario 6: wrong bearer token → 401 with an enveloped AUTH_DENIED.
#[tokio::test]
async fn wrong_bearer_token_is_401_with_envelope() {
    let router = router().await;
    let response = router
        .oneshot(mcp_call("fabric.health", json!({}), Some("wrong-token")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"]["code"], "AUTH_DENIED");
    assert!(body["trace"]["trace_id"].as_str().is_some());
}

#[tokio::test]
async fn missing_token_is_401() {
    let router = router().await;
    let response = router
        .oneshot(mcp_call("fabric.health", json!({}), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn authenticated_call_succeeds() {
    let router = router().await;
    let response = router
        .oneshot(mcp_call("fabric.health", json!({}), Some(TEST_PSK)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["ok"], true);
    assert_eq!(body["result"]["registry"], "ok");
}

#[tokio::test]
async fn unknown_name_maps_to_400() {
    let router = router().await;
    let response = router
        .oneshot(mcp_call("fabric.nope", json!({}), Some(TEST_PSK)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "BAD_INPUT");
}

#[tokio::test]
async fn agent_not_found_maps_to_404() {
    let router = router().await;
    let response = router
        .oneshot(mcp_call(
            "fabric.call",
            json!({ "agent_id": "ghost", "capability": "x", "task": "t" }),
            Some(TEST_PSK),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn rest_conveniences_wrap_pipeline_calls() {
    let router = router().await;

    let response = router
        .clone()
        .oneshot(
            Request::get("/mcp/list_agents")
                .header(header::AUTHORIZATION, format!("Bearer {TEST_PSK}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["result"]["agents"][0]["agent_id"], "thinker");

    let response = router
        .clone()
        .oneshot(
            Request::get("/mcp/agent/thinker")
                .header(header::AUTHORIZATION, format!("Bearer {TEST_PSK}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["result"]["agent"]["display_name"], "Thinker");

    let response = router
        .clone()
        .oneshot(
            Request::get("/mcp/list_tools")
                .header(header::AUTHORIZATION, format!("Bearer {TEST_PSK}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert!(body["result"]["count"].as_u64().unwrap() >= 20);

    let response = router
        .oneshot(
            Request::get("/mcp/list_topics")
                .header(header::AUTHORIZATION, format!("Bearer {TEST_PSK}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn register_agent_convenience_round_trips() {
    let router = router().await;
    let manifest = json!({
        "agent_id": "late-joiner",
        "display_name": "Late Joiner",
        "endpoint": { "transport": "http", "uri": "http://late:9000" },
        "capabilities": [{ "name": "assist" }],
        "status": "online"
    });

    let response = router
        .clone()
        .oneshot(
            Request::post("/mcp/register_agent")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::AUTHORIZATION, format!("Bearer {TEST_PSK}"))
                .body(Body::from(manifest.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["result"]["status"], "registered");

    let response = router
        .oneshot(
            Request::get("/mcp/agent/late-joiner")
                .header(header::AUTHORIZATION, format!("Bearer {TEST_PSK}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["result"]["agent"]["agent_id"], "late-joiner");
}

#[tokio::test]
async fn metrics_require_auth_and_render_prometheus_text() {
    let router = router().await;

    let denied = router
        .clone()
        .oneshot(Request::get("/mcp/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

    // Drive one call so the counters are non-zero.
    let _ = router
        .clone()
        .oneshot(mcp_call("fabric.health", json!({}), Some(TEST_PSK)))
        .await
        .unwrap();

    let response = router
        .oneshot(
            Request::get("/mcp/metrics")
                .header(header::AUTHORIZATION, format!("Bearer {TEST_PSK}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("fabric_requests_total"));
    assert!(text.contains("fabric_uptime_seconds"));
}

#[tokio::test]
async fn streaming_call_uses_event_stream_framing() {
    let router = router().await;
    let response = router
        .oneshot(mcp_call(
            "fabric.call",
            json!({
                "agent_id": "thinker",
                "capability": "narrate",
                "task": "tell me",
                "stream": true
            }),
            Some(TEST_PSK),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/event-stream"));

    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let body = String::from_utf8(bytes.to_vec()).unwrap();
    let frames: Vec<&str> = body
        .lines()
        .filter(|l| l.starts_with("data:"))
        .collect();
    assert!(frames.len() >= 2);
    let last: serde_json::Value =
        serde_json::from_str(frames.last().unwrap().trim_start_matches("data:").trim()).unwrap();
    assert_eq!(last["event"], "final");
    assert_eq!(last["data"]["ok"], true);
}

#[tokio::test]
async fn rate_limit_returns_429_envelope() {
    let pipeline = pipeline_with(Vec::new()).await;
    let config = HttpFrontConfig {
        rate_max_requests: 2,
        ..Default::default()
    };
    let router = build_router(pipeline, &config);

    for _ in 0..2 {
        let response = router
            .clone()
            .oneshot(mcp_call("fabric.health", json!({}), Some(TEST_PSK)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = router
        .oneshot(mcp_call("fabric.health", json!({}), Some(TEST_PSK)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "RATE_LIMITED");
}
