//! End-to-end pipeline behavior over scripted agents: routing, error codes,
//! streaming contract, fallbacks, messaging, tools, and trace invariants.

mod common;

use common::{agent, empty_pipeline, pipeline_with, Behavior, TEST_PSK};
use futures::StreamExt;
use serde_json::json;
use std::collections::HashSet;

use fabric_gateway::pipeline::Credential;
use fabric_kernel::envelope::StreamEventKind;
use fabric_kernel::trace::TraceContext;

fn authed() -> Credential<'static> {
    Credential::Bearer(Some(TEST_PSK))
}

// ─── Universal invariants ────────────────────────────────────────────────────

#[tokio::test]
async fn every_response_carries_trace_ids() {
    let pipeline = empty_pipeline().await;

    let ok = pipeline.handle("fabric.health", json!({}), authed()).await;
    assert!(ok.ok);
    assert!(!ok.trace.trace_id.is_empty());
    assert!(!ok.trace.span_id.is_empty());

    let err = pipeline
        .handle("fabric.agent.describe", json!({"agent_id": "ghost"}), authed())
        .await;
    assert!(!err.ok);
    assert!(!err.trace.trace_id.is_empty());
    assert!(!err.trace.span_id.is_empty());
}

#[tokio::test]
async fn caller_trace_id_is_adopted_and_span_is_fresh() {
    let pipeline = empty_pipeline().await;
    let inbound = TraceContext::root();

    let response = pipeline
        .handle(
            "fabric.health",
            json!({ "trace": { "trace_id": inbound.trace_id, "parent_span_id": inbound.span_id } }),
            authed(),
        )
        .await;
    assert_eq!(response.trace.trace_id, inbound.trace_id);
    assert_ne!(response.trace.span_id, inbound.span_id);
    assert_eq!(
        response.trace.parent_span_id.as_deref(),
        Some(inbound.span_id.as_str())
    );
}

#[tokio::test]
async fn span_ids_are_unique_across_concurrent_requests() {
    let pipeline = empty_pipeline().await;
    let mut handles = Vec::new();
    for _ in 0..32 {
        let pipeline = pipeline.clone();
        handles.push(tokio::spawn(async move {
            pipeline.handle("fabric.health", json!({}), authed()).await
        }));
    }

    let mut span_ids = HashSet::new();
    for handle in handles {
        let response = handle.await.unwrap();
        assert!(span_ids.insert(response.trace.span_id));
    }
    assert_eq!(span_ids.len(), 32);
}

#[tokio::test]
async fn wrong_psk_is_denied_with_enveloped_error() {
    let pipeline = empty_pipeline().await;
    let response = pipeline
        .handle("fabric.health", json!({}), Credential::Bearer(Some("wrong")))
        .await;
    assert!(!response.ok);
    assert_eq!(response.error.unwrap().code.as_str(), "AUTH_DENIED");
    assert!(!response.trace.trace_id.is_empty());
}

#[tokio::test]
async fn unknown_call_name_is_bad_input() {
    let pipeline = empty_pipeline().await;
    let response = pipeline
        .handle("fabric.definitely.not.a.tool", json!({}), authed())
        .await;
    assert!(!response.ok);
    let error = response.error.unwrap();
    assert_eq!(error.code.as_str(), "BAD_INPUT");
    assert_eq!(error.details["reason"], "unknown tool");
}

// ─── Scenario 1: health on empty gateway ─────────────────────────────────────

#[tokio::test]
async fn health_on_empty_gateway() {
    let pipeline = empty_pipeline().await;
    let response = pipeline.handle("fabric.health", json!({}), authed()).await;
    assert!(response.ok);
    let result = response.result.unwrap();
    assert_eq!(result["registry"], "ok");
    assert_eq!(result["runtimes"]["online"], 0);
    assert_eq!(result["runtimes"]["degraded"], 0);
    assert_eq!(result["runtimes"]["offline"], 0);
    assert!(result["tools"]["builtin_count"].as_u64().unwrap() >= 20);
}

// ─── Scenarios 2–3: routing errors ───────────────────────────────────────────

#[tokio::test]
async fn call_to_unknown_agent_is_agent_not_found() {
    let pipeline = empty_pipeline().await;
    let response = pipeline
        .handle(
            "fabric.call",
            json!({ "agent_id": "nobody", "capability": "reason", "task": "x" }),
            authed(),
        )
        .await;
    assert!(!response.ok);
    assert_eq!(response.error.unwrap().code.as_str(), "AGENT_NOT_FOUND");
}

#[tokio::test]
async fn capability_mismatch_is_capability_not_found() {
    let pipeline = pipeline_with(vec![(
        agent("thinker", "Thinker", &[("reason", false)]),
        Behavior::Reply(json!({"answer": "ok"})),
    )])
    .await;

    let response = pipeline
        .handle(
            "fabric.call",
            json!({ "agent_id": "thinker", "capability": "summarize", "task": "x" }),
            authed(),
        )
        .await;
    assert!(!response.ok);
    assert_eq!(response.error.unwrap().code.as_str(), "CAPABILITY_NOT_FOUND");
}

#[tokio::test]
async fn missing_required_arguments_are_bad_input() {
    let pipeline = empty_pipeline().await;
    let response = pipeline
        .handle("fabric.call", json!({ "agent_id": "a" }), authed())
        .await;
    assert!(!response.ok);
    assert_eq!(response.error.unwrap().code.as_str(), "BAD_INPUT");
}

#[tokio::test]
async fn successful_call_returns_adapter_result() {
    let pipeline = pipeline_with(vec![(
        agent("thinker", "Thinker", &[("reason", false)]),
        Behavior::Reply(json!({"answer": 42})),
    )])
    .await;

    let response = pipeline
        .handle(
            "fabric.call",
            json!({ "agent_id": "thinker", "capability": "reason", "task": "think" }),
            authed(),
        )
        .await;
    assert!(response.ok);
    assert_eq!(response.result.unwrap()["answer"], 42);
}

// ─── Registry round trip ─────────────────────────────────────────────────────

#[tokio::test]
async fn registered_manifest_round_trips_through_describe() {
    let pipeline = empty_pipeline().await;
    let manifest = json!({
        "agent_id": "fresh",
        "display_name": "Fresh Agent",
        "version": "3.2.1",
        "runtime": "zero-style",
        "endpoint": { "transport": "http", "uri": "http://fresh:9000" },
        "capabilities": [
            { "name": "reason", "streaming": true, "max_timeout_ms": 15000 }
        ],
        "tags": ["llm"],
        "trust_tier": "org",
        "status": "online",
        "x_custom": { "pool": "b" }
    });

    let registered = pipeline
        .handle("fabric.agent.register", manifest.clone(), authed())
        .await;
    assert!(registered.ok, "{:?}", registered.error);

    let described = pipeline
        .handle("fabric.agent.describe", json!({"agent_id": "fresh"}), authed())
        .await;
    let got = &described.result.unwrap()["agent"];
    assert_eq!(got["agent_id"], manifest["agent_id"]);
    assert_eq!(got["version"], manifest["version"]);
    assert_eq!(got["runtime"], manifest["runtime"]);
    assert_eq!(got["capabilities"][0]["name"], "reason");
    assert_eq!(got["capabilities"][0]["max_timeout_ms"], 15000);
    assert_eq!(got["x_custom"]["pool"], "b");
}

#[tokio::test]
async fn list_filters_by_capability_and_status() {
    let pipeline = pipeline_with(vec![
        (
            agent("alpha", "Alpha", &[("reason", false)]),
            Behavior::Reply(json!({})),
        ),
        (
            agent("bravo", "Bravo", &[("fetch", false)]),
            Behavior::Reply(json!({})),
        ),
    ])
    .await;

    let response = pipeline
        .handle(
            "fabric.agent.list",
            json!({ "filter": { "capability": "reason" } }),
            authed(),
        )
        .await;
    let agents = response.result.unwrap()["agents"].as_array().unwrap().clone();
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0]["agent_id"], "alpha");

    let response = pipeline
        .handle(
            "fabric.agent.list",
            json!({ "filter": { "status": "offline" } }),
            authed(),
        )
        .await;
    assert!(response.result.unwrap()["agents"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn route_preview_lists_fallbacks_without_executing() {
    let pipeline = pipeline_with(vec![
        (
            agent("primary", "Primary", &[("reason", false)]),
            Behavior::Reply(json!({})),
        ),
        (
            agent("backup", "Backup", &[("reason", false)]),
            Behavior::Reply(json!({})),
        ),
    ])
    .await;

    let response = pipeline
        .handle(
            "fabric.route.preview",
            json!({ "agent_id": "primary", "capability": "reason" }),
            authed(),
        )
        .await;
    assert!(response.ok);
    let result = response.result.unwrap();
    assert_eq!(result["selected_runtime"]["adapter"], "native");
    assert_eq!(result["policy"]["allowed"], true);
    let fallbacks = result["fallbacks"].as_array().unwrap();
    assert_eq!(fallbacks.len(), 1);
    assert_eq!(fallbacks[0]["agent_id"], "backup");
}

// ─── Fallback policy ─────────────────────────────────────────────────────────

#[tokio::test]
async fn offline_primary_falls_back_to_capability_peer() {
    let pipeline = pipeline_with(vec![
        (
            agent("flaky", "Flaky", &[("reason", false)]),
            Behavior::Offline,
        ),
        (
            agent("steady", "Steady", &[("reason", false)]),
            Behavior::Reply(json!({"answer": "from steady"})),
        ),
    ])
    .await;

    let response = pipeline
        .handle(
            "fabric.call",
            json!({ "agent_id": "flaky", "capability": "reason", "task": "x" }),
            authed(),
        )
        .await;
    assert!(response.ok, "{:?}", response.error);
    assert_eq!(response.result.unwrap()["answer"], "from steady");
}

#[tokio::test]
async fn exhausted_fallbacks_report_the_chain() {
    let pipeline = pipeline_with(vec![
        (
            agent("flaky", "Flaky", &[("reason", false)]),
            Behavior::Offline,
        ),
        (
            agent("alsoflaky", "Also Flaky", &[("reason", false)]),
            Behavior::Offline,
        ),
    ])
    .await;

    let response = pipeline
        .handle(
            "fabric.call",
            json!({ "agent_id": "flaky", "capability": "reason", "task": "x" }),
            authed(),
        )
        .await;
    assert!(!response.ok);
    let error = response.error.unwrap();
    assert_eq!(error.code.as_str(), "AGENT_OFFLINE");
    let fallbacks = error.details["fallbacks"].as_array().unwrap();
    assert_eq!(fallbacks.len(), 2);
    assert_eq!(fallbacks[0]["agent_id"], "flaky");
    assert_eq!(fallbacks[1]["agent_id"], "alsoflaky");
}

// ─── Scenario 5: streaming ───────────────────────────────────────────────────

#[tokio::test]
async fn streaming_call_terminates_with_final_event() {
    let trace = TraceContext::root();
    let pipeline = pipeline_with(vec![(
        agent("streamer", "Streamer", &[("narrate", true)]),
        Behavior::Stream(vec![
            fabric_kernel::envelope::StreamEvent::status("starting", &trace),
            fabric_kernel::envelope::StreamEvent::token("hello ", &trace),
            fabric_kernel::envelope::StreamEvent::token("world", &trace),
            fabric_kernel::envelope::StreamEvent::final_ok(json!({"answer": "hello world"}), &trace),
        ]),
    )])
    .await;

    let stream = pipeline
        .handle_stream(
            "fabric.call",
            json!({ "agent_id": "streamer", "capability": "narrate", "task": "x", "stream": true }),
            authed(),
        )
        .await
        .expect("stream should open");

    let events: Vec<_> = stream.map(|e| e.unwrap()).collect().await;
    assert!(events.len() >= 2, "at least one event plus final");
    let last = events.last().unwrap();
    assert_eq!(last.kind, StreamEventKind::Final);
    assert_eq!(last.data["ok"], true);
    // Nothing follows final.
    assert!(events[..events.len() - 1].iter().all(|e| e.kind != StreamEventKind::Final));
}

#[tokio::test]
async fn upstream_without_final_gets_one_synthesized() {
    let trace = TraceContext::root();
    let pipeline = pipeline_with(vec![(
        agent("rude", "Rude", &[("narrate", true)]),
        Behavior::Stream(vec![fabric_kernel::envelope::StreamEvent::token("partial", &trace)]),
    )])
    .await;

    let stream = pipeline
        .handle_stream(
            "fabric.call",
            json!({ "agent_id": "rude", "capability": "narrate", "task": "x", "stream": true }),
            authed(),
        )
        .await
        .unwrap();
    let events: Vec<_> = stream.map(|e| e.unwrap()).collect().await;
    let last = events.last().unwrap();
    assert_eq!(last.kind, StreamEventKind::Final);
    assert_eq!(last.data["ok"], false);
}

#[tokio::test]
async fn streaming_on_non_streaming_capability_degrades_to_single_final() {
    let pipeline = pipeline_with(vec![(
        agent("plain", "Plain", &[("reason", false)]),
        Behavior::Reply(json!({"answer": "sync"})),
    )])
    .await;

    let stream = pipeline
        .handle_stream(
            "fabric.call",
            json!({ "agent_id": "plain", "capability": "reason", "task": "x", "stream": true }),
            authed(),
        )
        .await
        .unwrap();
    let events: Vec<_> = stream.map(|e| e.unwrap()).collect().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, StreamEventKind::Final);
    assert_eq!(events[0].data["result"]["answer"], "sync");
}

#[tokio::test]
async fn streaming_resolution_failure_is_an_envelope_not_a_stream() {
    let pipeline = empty_pipeline().await;
    let failure = pipeline
        .handle_stream(
            "fabric.call",
            json!({ "agent_id": "ghost", "capability": "x", "task": "t", "stream": true }),
            authed(),
        )
        .await
        .err()
        .expect("resolution failures surface pre-stream");
    assert!(!failure.ok);
    assert_eq!(failure.error.unwrap().code.as_str(), "AGENT_NOT_FOUND");
}

// ─── Scenario 4: message round trip ──────────────────────────────────────────

#[tokio::test]
async fn message_send_receive_ack_round_trip() {
    let pipeline = empty_pipeline().await;

    let sent = pipeline
        .handle(
            "fabric.message.send",
            json!({
                "to_agent": "percy", "from_agent": "coder",
                "message_type": "task", "payload": { "k": 1 }
            }),
            authed(),
        )
        .await;
    assert!(sent.ok);
    let sent = sent.result.unwrap();
    assert_eq!(sent["status"], "queued");
    assert!(sent["message_id"].as_str().unwrap().starts_with("msg:"));

    let received = pipeline
        .handle(
            "fabric.message.receive",
            json!({ "agent_id": "percy", "count": 1, "block_ms": 1000 }),
            authed(),
        )
        .await;
    let received = received.result.unwrap();
    assert_eq!(received["count"], 1);
    assert_eq!(received["messages"][0]["payload"]["k"], 1);
    let entry_id = received["messages"][0]["stream_entry_id"]
        .as_str()
        .unwrap()
        .to_string();

    let acked = pipeline
        .handle(
            "fabric.message.acknowledge",
            json!({ "agent_id": "percy", "message_ids": [entry_id] }),
            authed(),
        )
        .await;
    let acked = acked.result.unwrap();
    assert_eq!(acked["acknowledged"][0]["acked"], true);

    let empty = pipeline
        .handle(
            "fabric.message.receive",
            json!({ "agent_id": "percy", "count": 1, "block_ms": 100 }),
            authed(),
        )
        .await;
    assert_eq!(empty.result.unwrap()["count"], 0);
}

#[tokio::test]
async fn queue_status_reports_depth() {
    let pipeline = empty_pipeline().await;
    for _ in 0..2 {
        pipeline
            .handle(
                "fabric.message.send",
                json!({
                    "to_agent": "worker", "from_agent": "boss",
                    "message_type": "task", "payload": {}
                }),
                authed(),
            )
            .await;
    }
    let status = pipeline
        .handle(
            "fabric.message.queue_status",
            json!({ "agent_id": "worker" }),
            authed(),
        )
        .await;
    let result = status.result.unwrap();
    assert_eq!(result["agent_id"], "worker");
    assert!(result["queue_depth"].as_u64().unwrap() >= 2);
}

#[tokio::test]
async fn publish_reports_zero_recipients_without_subscribers() {
    let pipeline = empty_pipeline().await;
    let response = pipeline
        .handle(
            "fabric.message.publish",
            json!({ "topic": "shared:news", "message": { "x": 1 }, "from_agent": "mon" }),
            authed(),
        )
        .await;
    let result = response.result.unwrap();
    assert_eq!(result["published"], true);
    assert_eq!(result["recipients"], 0);
    assert_eq!(result["topic"], "shared:news");
}

// ─── Tool dispatch ───────────────────────────────────────────────────────────

#[tokio::test]
async fn tool_list_describe_call_for_every_builtin() {
    let pipeline = empty_pipeline().await;
    let listed = pipeline
        .handle("fabric.tool.list", json!({ "provider": "builtin" }), authed())
        .await;
    let tools = listed.result.unwrap()["tools"].as_array().unwrap().clone();
    assert!(tools.len() >= 20);

    for tool in &tools {
        let tool_id = tool["tool_id"].as_str().unwrap();
        let described = pipeline
            .handle("fabric.tool.describe", json!({ "tool_id": tool_id }), authed())
            .await;
        assert!(described.ok, "describe failed for {tool_id}");
    }
}

#[tokio::test]
async fn tool_call_executes_builtin() {
    let pipeline = empty_pipeline().await;
    let response = pipeline
        .handle(
            "fabric.tool.call",
            json!({
                "tool_id": "math.calculate",
                "capability": "eval",
                "parameters": { "expression": "6 * 7" }
            }),
            authed(),
        )
        .await;
    assert!(response.ok);
    assert_eq!(response.result.unwrap()["result"], 42);
}

#[tokio::test]
async fn direct_tool_name_dispatches_with_inline_parameters() {
    let pipeline = empty_pipeline().await;
    let response = pipeline
        .handle(
            "fabric.tool.security.hash",
            json!({ "data": "abc", "algorithm": "sha256" }),
            authed(),
        )
        .await;
    assert!(response.ok);
    assert_eq!(
        response.result.unwrap()["hash"],
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}

#[tokio::test]
async fn unknown_tool_and_capability_error_codes() {
    let pipeline = empty_pipeline().await;

    let response = pipeline
        .handle(
            "fabric.tool.call",
            json!({ "tool_id": "no.such", "capability": "x", "parameters": {} }),
            authed(),
        )
        .await;
    assert_eq!(response.error.unwrap().code.as_str(), "TOOL_NOT_FOUND");

    let response = pipeline
        .handle(
            "fabric.tool.call",
            json!({ "tool_id": "math.calculate", "capability": "integrate", "parameters": {} }),
            authed(),
        )
        .await;
    assert_eq!(response.error.unwrap().code.as_str(), "CAPABILITY_NOT_FOUND");
}

#[tokio::test]
async fn tool_failure_surfaces_tool_execution_error() {
    let pipeline = empty_pipeline().await;
    let response = pipeline
        .handle(
            "fabric.tool.call",
            json!({
                "tool_id": "math.calculate",
                "capability": "eval",
                "parameters": { "expression": "2 +* 2" }
            }),
            authed(),
        )
        .await;
    assert!(!response.ok);
    let error = response.error.unwrap();
    assert_eq!(error.code.as_str(), "TOOL_EXECUTION_ERROR");
    assert_eq!(error.details["tool_code"], "EVAL_ERROR");
}

#[tokio::test]
async fn remote_caller_cannot_run_local_tier_tools() {
    let pipeline = empty_pipeline().await;
    let response = pipeline
        .handle(
            "fabric.tool.call",
            json!({
                "tool_id": "system.execute",
                "capability": "exec",
                "parameters": { "command": "echo hi" }
            }),
            authed(),
        )
        .await;
    assert!(!response.ok);
    assert_eq!(response.error.unwrap().details["tool_code"], "TRUST_DENIED");
}

#[tokio::test]
async fn local_caller_can_run_local_tier_tools() {
    let pipeline = empty_pipeline().await;
    let response = pipeline
        .handle(
            "fabric.tool.call",
            json!({
                "tool_id": "system.execute",
                "capability": "exec",
                "parameters": { "command": "echo hi" }
            }),
            Credential::Local,
        )
        .await;
    assert!(response.ok, "{:?}", response.error);
    assert!(response.result.unwrap()["stdout"]
        .as_str()
        .unwrap()
        .contains("hi"));
}

#[tokio::test]
async fn agent_capabilities_appear_as_pseudo_tools() {
    let pipeline = pipeline_with(vec![(
        agent("thinker", "Thinker", &[("reason", false)]),
        Behavior::Reply(json!({"answer": "ok"})),
    )])
    .await;

    let listed = pipeline
        .handle("fabric.tool.list", json!({ "provider": "agent" }), authed())
        .await;
    let tools = listed.result.unwrap()["tools"].as_array().unwrap().clone();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0]["tool_id"], "agent.thinker.reason");

    // Calling the pseudo-tool delegates to the agent path.
    let called = pipeline
        .handle(
            "fabric.tool.call",
            json!({
                "tool_id": "agent.thinker.reason",
                "parameters": { "task": "go" }
            }),
            authed(),
        )
        .await;
    assert!(called.ok, "{:?}", called.error);
    assert_eq!(called.result.unwrap()["answer"], "ok");
}
