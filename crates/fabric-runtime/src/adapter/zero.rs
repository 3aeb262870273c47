//! Adapter for zero-style agents.
//!
//! Translates the canonical envelope into the foreign request shape
//! `{"action_name", "params", "trace_id"}` and maps the foreign response
//! (`{"status", "result", "error"}`) back into the canonical form. Foreign
//! stream frames use a `{"type": ...}` discriminator and are translated
//! event by event.

use async_trait::async_trait;
use tracing::debug;

use fabric_kernel::envelope::{BoxEventStream, CanonicalEnvelope, StreamEvent, StreamEventKind};
use fabric_kernel::error::{ErrorCode, FabricError, FabricResult};
use fabric_kernel::manifest::{AgentManifest, AgentStatus};

use super::{
    canonical_frame, effective_timeout, post_json, post_sse, probe_http_health, sse_event_stream,
    RuntimeAdapter,
};

pub struct ZeroStyleAdapter {
    client: reqwest::Client,
    manifest: AgentManifest,
}

impl ZeroStyleAdapter {
    pub fn new(client: reqwest::Client, manifest: AgentManifest) -> Self {
        Self { client, manifest }
    }

    fn request_body(&self, envelope: &CanonicalEnvelope) -> serde_json::Value {
        serde_json::json!({
            "action_name": &envelope.target.capability,
            "params": &envelope.input,
            "trace_id": &envelope.trace.trace_id,
        })
    }

    fn unwrap_response(&self, body: serde_json::Value) -> FabricResult<serde_json::Value> {
        match body.get("status").and_then(|v| v.as_str()) {
            Some("ok") | Some("success") => {
                Ok(body.get("result").cloned().unwrap_or(serde_json::Value::Null))
            }
            Some(other) => {
                debug!(agent_id = %self.manifest.agent_id, status = %other, "zero-style agent reported failure");
                Err(FabricError::new(
                    ErrorCode::UpstreamError,
                    format!("Agent {} reported an error", self.manifest.agent_id),
                )
                .with_details(serde_json::json!({ "agent_status": other })))
            }
            None => Err(FabricError::new(
                ErrorCode::UpstreamError,
                format!("Agent {} returned a malformed response", self.manifest.agent_id),
            )),
        }
    }
}

/// Translate one foreign stream frame into a canonical event. Canonical
/// frames pass through unchanged so mixed implementations keep working.
fn map_zero_frame(value: &serde_json::Value) -> Option<StreamEvent> {
    if let Some(event) = canonical_frame(value) {
        return Some(event);
    }
    let kind = value.get("type").and_then(|v| v.as_str())?;
    let event = match kind {
        "status" => StreamEvent {
            kind: StreamEventKind::Status,
            data: value.clone(),
        },
        "delta" | "token" => StreamEvent {
            kind: StreamEventKind::Token,
            data: serde_json::json!({ "text": value.get("text").cloned().unwrap_or_default() }),
        },
        "progress" => StreamEvent {
            kind: StreamEventKind::Progress,
            data: value.clone(),
        },
        "tool_call" => StreamEvent {
            kind: StreamEventKind::ToolCall,
            data: value.clone(),
        },
        "done" | "final" => StreamEvent {
            kind: StreamEventKind::Final,
            data: serde_json::json!({
                "ok": value.get("error").is_none(),
                "result": value.get("result").cloned().unwrap_or(serde_json::Value::Null),
            }),
        },
        _ => return None,
    };
    Some(event)
}

#[async_trait]
impl RuntimeAdapter for ZeroStyleAdapter {
    async fn call(&self, envelope: &CanonicalEnvelope) -> FabricResult<serde_json::Value> {
        debug!(
            agent_id = %self.manifest.agent_id,
            capability = %envelope.target.capability,
            trace_id = %envelope.trace.trace_id,
            "zero-style call"
        );
        let body = self.request_body(envelope);
        let response = post_json(
            &self.client,
            &self.manifest.agent_id,
            &self.manifest.endpoint.uri,
            &body,
            effective_timeout(envelope),
        )
        .await?;
        self.unwrap_response(response)
    }

    async fn call_stream(&self, envelope: &CanonicalEnvelope) -> FabricResult<BoxEventStream> {
        let deadline = effective_timeout(envelope);
        let body = self.request_body(envelope);
        let response = post_sse(
            &self.client,
            &self.manifest.agent_id,
            &self.manifest.endpoint.uri,
            &body,
            deadline,
        )
        .await?;
        Ok(sse_event_stream(
            response,
            self.manifest.agent_id.clone(),
            deadline,
            map_zero_frame,
        ))
    }

    async fn probe_health(&self) -> AgentStatus {
        probe_http_health(&self.client, &self.manifest).await
    }

    async fn describe(&self) -> FabricResult<AgentManifest> {
        Ok(self.manifest.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn foreign_frames_translate() {
        let token = map_zero_frame(&serde_json::json!({"type": "delta", "text": "hi"})).unwrap();
        assert_eq!(token.kind, StreamEventKind::Token);
        assert_eq!(token.data["text"], "hi");

        let done = map_zero_frame(&serde_json::json!({"type": "done", "result": {"a": 1}})).unwrap();
        assert_eq!(done.kind, StreamEventKind::Final);
        assert_eq!(done.data["ok"], true);
        assert_eq!(done.data["result"]["a"], 1);

        let failed = map_zero_frame(&serde_json::json!({"type": "final", "error": "x"})).unwrap();
        assert_eq!(failed.data["ok"], false);

        assert!(map_zero_frame(&serde_json::json!({"type": "noise"})).is_none());
    }

    #[test]
    fn canonical_frames_pass_through() {
        let v = serde_json::json!({"event": "progress", "data": {"percent": 50}});
        let event = map_zero_frame(&v).unwrap();
        assert_eq!(event.kind, StreamEventKind::Progress);
    }

    #[test]
    fn response_status_mapping() {
        let manifest = AgentManifest::new("z", "Z", "http://z");
        let adapter = ZeroStyleAdapter::new(reqwest::Client::new(), manifest);

        let ok = adapter
            .unwrap_response(serde_json::json!({"status": "success", "result": 7}))
            .unwrap();
        assert_eq!(ok, 7);

        let err = adapter
            .unwrap_response(serde_json::json!({"status": "failed", "error": "boom"}))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::UpstreamError);
        assert_eq!(err.details["agent_status"], "failed");
    }
}
