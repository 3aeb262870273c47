//! Adapter for agents speaking the gateway's native protocol.
//!
//! Request: `POST {endpoint} {"name": <capability>, "arguments": <input>,
//! "trace": <child trace>}`. Response: `{"ok": true, "result": ...}` or
//! `{"ok": false, "error": {...}}`. Streaming uses the canonical
//! `{"event", "data"}` SSE frames directly.

use async_trait::async_trait;
use tracing::debug;

use fabric_kernel::envelope::{BoxEventStream, CanonicalEnvelope};
use fabric_kernel::error::{ErrorCode, FabricError, FabricResult};
use fabric_kernel::manifest::{AgentManifest, AgentStatus};

use super::{
    canonical_frame, effective_timeout, post_json, post_sse, probe_http_health, sse_event_stream,
    RuntimeAdapter,
};

pub struct NativeAdapter {
    client: reqwest::Client,
    manifest: AgentManifest,
}

impl NativeAdapter {
    pub fn new(client: reqwest::Client, manifest: AgentManifest) -> Self {
        Self { client, manifest }
    }

    fn request_body(&self, envelope: &CanonicalEnvelope) -> serde_json::Value {
        serde_json::json!({
            "name": &envelope.target.capability,
            "arguments": &envelope.input,
            "trace": envelope.trace.child(),
        })
    }

    fn unwrap_response(&self, body: serde_json::Value) -> FabricResult<serde_json::Value> {
        match body.get("ok").and_then(|v| v.as_bool()) {
            Some(true) => Ok(body.get("result").cloned().unwrap_or(serde_json::Value::Null)),
            Some(false) => {
                let code = body
                    .pointer("/error/code")
                    .and_then(|v| v.as_str())
                    .unwrap_or("UNKNOWN")
                    .to_string();
                debug!(agent_id = %self.manifest.agent_id, upstream_code = %code, "agent returned error");
                Err(FabricError::new(
                    ErrorCode::UpstreamError,
                    format!("Agent {} reported an error", self.manifest.agent_id),
                )
                .with_details(serde_json::json!({ "agent_error": code })))
            }
            None => Err(FabricError::new(
                ErrorCode::UpstreamError,
                format!("Agent {} returned a malformed response", self.manifest.agent_id),
            )),
        }
    }
}

#[async_trait]
impl RuntimeAdapter for NativeAdapter {
    async fn call(&self, envelope: &CanonicalEnvelope) -> FabricResult<serde_json::Value> {
        debug!(
            agent_id = %self.manifest.agent_id,
            capability = %envelope.target.capability,
            trace_id = %envelope.trace.trace_id,
            "native call"
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
        debug!(
            agent_id = %self.manifest.agent_id,
            capability = %envelope.target.capability,
            trace_id = %envelope.trace.trace_id,
            "native streaming call"
        );
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
            canonical_frame,
        ))
    }

    async fn probe_health(&self) -> AgentStatus {
        probe_http_health(&self.client, &self.manifest).await
    }

    async fn describe(&self) -> FabricResult<AgentManifest> {
        Ok(self.manifest.clone())
    }
}
