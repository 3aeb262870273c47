//! Adapter for custom-HTTP agents.
//!
//! Follows the same translate-and-map pattern as the other adapters, but
//! the request/response shape is defined per agent through a `custom`
//! block in the manifest's extra fields:
//!
//! ```yaml
//! agent_id: legacy-summarizer
//! runtime: custom-http
//! custom:
//!   capability_field: action      # default "capability"
//!   input_field: payload          # default "input"
//!   result_pointer: /data/result  # default: whole response body
//! ```

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use fabric_kernel::envelope::{BoxEventStream, CanonicalEnvelope};
use fabric_kernel::error::{FabricError, FabricResult};
use fabric_kernel::manifest::{AgentManifest, AgentStatus};

use super::{
    canonical_frame, effective_timeout, post_json, post_sse, probe_http_health, sse_event_stream,
    RuntimeAdapter,
};

#[derive(Debug, Clone, Deserialize)]
struct CustomShape {
    #[serde(default = "default_capability_field")]
    capability_field: String,
    #[serde(default = "default_input_field")]
    input_field: String,
    #[serde(default)]
    result_pointer: String,
}

fn default_capability_field() -> String {
    "capability".to_string()
}

fn default_input_field() -> String {
    "input".to_string()
}

impl Default for CustomShape {
    fn default() -> Self {
        Self {
            capability_field: default_capability_field(),
            input_field: default_input_field(),
            result_pointer: String::new(),
        }
    }
}

pub struct CustomHttpAdapter {
    client: reqwest::Client,
    manifest: AgentManifest,
    shape: CustomShape,
}

impl CustomHttpAdapter {
    pub fn new(client: reqwest::Client, manifest: AgentManifest) -> Self {
        let shape = manifest
            .extra
            .get("custom")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        Self {
            client,
            manifest,
            shape,
        }
    }

    fn request_body(&self, envelope: &CanonicalEnvelope) -> serde_json::Value {
        let mut body = serde_json::Map::new();
        body.insert(
            self.shape.capability_field.clone(),
            serde_json::Value::String(envelope.target.capability.clone()),
        );
        body.insert(
            self.shape.input_field.clone(),
            serde_json::to_value(&envelope.input).unwrap_or(serde_json::Value::Null),
        );
        body.insert(
            "trace_id".to_string(),
            serde_json::Value::String(envelope.trace.trace_id.clone()),
        );
        serde_json::Value::Object(body)
    }

    fn extract_result(&self, body: serde_json::Value) -> FabricResult<serde_json::Value> {
        if self.shape.result_pointer.is_empty() {
            return Ok(body);
        }
        body.pointer(&self.shape.result_pointer)
            .cloned()
            .ok_or_else(|| {
                FabricError::new(
                    fabric_kernel::error::ErrorCode::UpstreamError,
                    format!(
                        "Agent {} response is missing the configured result field",
                        self.manifest.agent_id
                    ),
                )
            })
    }
}

#[async_trait]
impl RuntimeAdapter for CustomHttpAdapter {
    async fn call(&self, envelope: &CanonicalEnvelope) -> FabricResult<serde_json::Value> {
        debug!(
            agent_id = %self.manifest.agent_id,
            capability = %envelope.target.capability,
            trace_id = %envelope.trace.trace_id,
            "custom-http call"
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
        self.extract_result(response)
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

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_kernel::auth::AuthContext;
    use fabric_kernel::envelope::{CallInput, CallTarget, ResponseSpec, TargetKind};
    use fabric_kernel::manifest::RuntimeKind;
    use fabric_kernel::trace::TraceContext;

    fn envelope() -> CanonicalEnvelope {
        CanonicalEnvelope {
            trace: TraceContext::root(),
            auth: AuthContext::local(),
            target: CallTarget {
                kind: TargetKind::Agent,
                id: "legacy".into(),
                capability: "summarize".into(),
                timeout_ms: Some(1_000),
            },
            input: CallInput {
                task: Some("tl;dr".into()),
                ..Default::default()
            },
            response: ResponseSpec::default(),
        }
    }

    #[test]
    fn shape_defaults_apply_without_config() {
        let manifest = AgentManifest::new("legacy", "Legacy", "http://legacy")
            .with_runtime(RuntimeKind::CustomHttp);
        let adapter = CustomHttpAdapter::new(reqwest::Client::new(), manifest);
        let body = adapter.request_body(&envelope());
        assert_eq!(body["capability"], "summarize");
        assert_eq!(body["input"]["task"], "tl;dr");
        assert!(body["trace_id"].as_str().is_some());
    }

    #[test]
    fn configured_shape_renames_fields_and_extracts_result() {
        let mut manifest = AgentManifest::new("legacy", "Legacy", "http://legacy")
            .with_runtime(RuntimeKind::CustomHttp);
        manifest.extra.insert(
            "custom".to_string(),
            serde_json::json!({
                "capability_field": "action",
                "input_field": "payload",
                "result_pointer": "/data/result"
            }),
        );
        let adapter = CustomHttpAdapter::new(reqwest::Client::new(), manifest);

        let body = adapter.request_body(&envelope());
        assert_eq!(body["action"], "summarize");
        assert_eq!(body["payload"]["task"], "tl;dr");

        let out = adapter
            .extract_result(serde_json::json!({"data": {"result": {"summary": "short"}}}))
            .unwrap();
        assert_eq!(out["summary"], "short");

        let missing = adapter.extract_result(serde_json::json!({"data": {}}));
        assert!(missing.is_err());
    }
}
