//! Runtime adapter layer.
//!
//! Adapters translate the canonical envelope into an agent's native wire
//! protocol and back. Three families are contracted: native (speaks the
//! gateway's own `{name, arguments}` shape), zero-style (the foreign
//! `{action_name, params, trace_id}` shape), and custom-HTTP (field names
//! configured per agent).
//!
//! Adapters are constructed per dispatch against a manifest snapshot; they
//! hold no registry reference, so a manifest disappearing between calls
//! surfaces as `AGENT_NOT_FOUND` at the next lookup, not here. Dropping a
//! call future or an event stream aborts the underlying HTTP transfer.

pub mod custom;
pub mod native;
pub mod zero;

pub use custom::CustomHttpAdapter;
pub use native::NativeAdapter;
pub use zero::ZeroStyleAdapter;

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fabric_kernel::envelope::{BoxEventStream, CanonicalEnvelope, StreamEvent};
use fabric_kernel::error::{ErrorCode, FabricError, FabricResult};
use fabric_kernel::manifest::{AgentManifest, AgentStatus, RuntimeKind, TransportKind};

/// Fallback deadline when neither the call nor the capability supplies one.
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

#[async_trait]
pub trait RuntimeAdapter: Send + Sync {
    /// Execute a synchronous call; returns the capability-specific result
    /// payload. The effective deadline is `envelope.target.timeout_ms`
    /// (the pipeline resolves the capability default before dispatch).
    async fn call(&self, envelope: &CanonicalEnvelope) -> FabricResult<serde_json::Value>;

    /// Execute a streaming call. The returned sequence ends with a `final`
    /// event; cancellation (dropping the stream) closes the transport.
    async fn call_stream(&self, envelope: &CanonicalEnvelope) -> FabricResult<BoxEventStream>;

    /// Probe the agent's liveness.
    async fn probe_health(&self) -> AgentStatus;

    /// The manifest this adapter was constructed against.
    async fn describe(&self) -> FabricResult<AgentManifest>;
}

/// Constructs adapters for manifest snapshots. The pipeline asks for a
/// fresh adapter each dispatch; implementations share their HTTP client.
pub trait AdapterProvider: Send + Sync {
    fn adapter_for(&self, manifest: &AgentManifest) -> Arc<dyn RuntimeAdapter>;
}

/// Default provider: selects the adapter family by `runtime_kind` and
/// shares one reqwest client across all of them.
pub struct HttpAdapterProvider {
    client: reqwest::Client,
}

impl HttpAdapterProvider {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpAdapterProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterProvider for HttpAdapterProvider {
    fn adapter_for(&self, manifest: &AgentManifest) -> Arc<dyn RuntimeAdapter> {
        match manifest.runtime_kind {
            RuntimeKind::Native => {
                Arc::new(NativeAdapter::new(self.client.clone(), manifest.clone()))
            }
            RuntimeKind::ZeroStyle => {
                Arc::new(ZeroStyleAdapter::new(self.client.clone(), manifest.clone()))
            }
            RuntimeKind::CustomHttp => {
                Arc::new(CustomHttpAdapter::new(self.client.clone(), manifest.clone()))
            }
            _ => unreachable!("unknown RuntimeKind variant"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared HTTP plumbing
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) fn effective_timeout(envelope: &CanonicalEnvelope) -> Duration {
    Duration::from_millis(envelope.target.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS))
}

/// Map a transport-level reqwest failure onto the canonical codes: refused
/// connections mean the agent is gone, timeouts are timeouts, everything
/// else is an upstream fault. Raw error text stays in the log, not the wire.
pub(crate) fn transport_error(agent_id: &str, err: &reqwest::Error) -> FabricError {
    if err.is_connect() {
        tracing::warn!(agent_id = %agent_id, error = %err, "agent endpoint unreachable");
        FabricError::agent_offline(agent_id)
    } else if err.is_timeout() {
        FabricError::new(ErrorCode::Timeout, format!("Call to {agent_id} timed out"))
    } else {
        tracing::warn!(agent_id = %agent_id, error = %err, "upstream transport error");
        FabricError::new(
            ErrorCode::UpstreamError,
            format!("Upstream error calling {agent_id}"),
        )
    }
}

/// POST a JSON body and decode a JSON response, honoring the envelope
/// deadline.
pub(crate) async fn post_json(
    client: &reqwest::Client,
    agent_id: &str,
    uri: &str,
    body: &serde_json::Value,
    deadline: Duration,
) -> FabricResult<serde_json::Value> {
    let request = client.post(uri).json(body).send();
    let response = tokio::time::timeout(deadline, request)
        .await
        .map_err(|_| FabricError::timeout(&format!("Call to {agent_id}"), deadline.as_millis() as u64))?
        .map_err(|e| transport_error(agent_id, &e))?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        tracing::warn!(agent_id = %agent_id, status, "upstream returned error status");
        return Err(FabricError::new(
            ErrorCode::UpstreamError,
            format!("Upstream {agent_id} returned HTTP {status}"),
        )
        .with_details(serde_json::json!({ "http_status": status })));
    }

    tokio::time::timeout(deadline, response.json::<serde_json::Value>())
        .await
        .map_err(|_| FabricError::timeout(&format!("Call to {agent_id}"), deadline.as_millis() as u64))?
        .map_err(|e| transport_error(agent_id, &e))
}

/// Open a streaming POST with `Accept: text/event-stream`.
pub(crate) async fn post_sse(
    client: &reqwest::Client,
    agent_id: &str,
    uri: &str,
    body: &serde_json::Value,
    deadline: Duration,
) -> FabricResult<reqwest::Response> {
    let request = client
        .post(uri)
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .json(body)
        .send();
    let response = tokio::time::timeout(deadline, request)
        .await
        .map_err(|_| FabricError::timeout(&format!("Call to {agent_id}"), deadline.as_millis() as u64))?
        .map_err(|e| transport_error(agent_id, &e))?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        return Err(FabricError::new(
            ErrorCode::UpstreamError,
            format!("Upstream {agent_id} returned HTTP {status}"),
        ));
    }
    Ok(response)
}

type BytesStream = Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>;

struct SseState {
    inner: BytesStream,
    agent_id: String,
    buffer: String,
    ready: VecDeque<FabricResult<StreamEvent>>,
    deadline: Instant,
    done: bool,
    map_frame: fn(&serde_json::Value) -> Option<StreamEvent>,
}

/// Canonical frame shape: `{"event": kind, "data": {...}}`.
pub(crate) fn canonical_frame(value: &serde_json::Value) -> Option<StreamEvent> {
    serde_json::from_value(value.clone()).ok()
}

/// Parse an SSE response body into stream events.
///
/// Each `data: <json>` frame is decoded with `map_frame`; frames the mapper
/// rejects are skipped (foreign keep-alives and comments). The overall
/// deadline applies to the whole transfer; on expiry the stream yields a
/// timeout error and ends, which the terminal-final wrapper upgrades to an
/// error `final`.
pub(crate) fn sse_event_stream(
    response: reqwest::Response,
    agent_id: String,
    deadline: Duration,
    map_frame: fn(&serde_json::Value) -> Option<StreamEvent>,
) -> BoxEventStream {
    let state = SseState {
        inner: Box::pin(response.bytes_stream()),
        agent_id,
        buffer: String::new(),
        ready: VecDeque::new(),
        deadline: Instant::now() + deadline,
        done: false,
        map_frame,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.ready.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }

            let remaining = state.deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                state.done = true;
                return Some((
                    Err(FabricError::new(
                        ErrorCode::Timeout,
                        format!("Stream from {} timed out", state.agent_id),
                    )),
                    state,
                ));
            }

            match tokio::time::timeout(remaining, state.inner.next()).await {
                Err(_) => {
                    state.done = true;
                    return Some((
                        Err(FabricError::new(
                            ErrorCode::Timeout,
                            format!("Stream from {} timed out", state.agent_id),
                        )),
                        state,
                    ));
                }
                Ok(Some(Err(err))) => {
                    state.done = true;
                    return Some((Err(transport_error(&state.agent_id, &err)), state));
                }
                Ok(None) => {
                    state.done = true;
                    // A trailing frame without the final blank line still counts.
                    let tail = std::mem::take(&mut state.buffer);
                    push_frames(&mut state, &format!("{tail}\n\n"));
                }
                Ok(Some(Ok(chunk))) => {
                    state.buffer.push_str(&String::from_utf8_lossy(&chunk));
                    let pending = std::mem::take(&mut state.buffer);
                    let consumed = drain_complete_frames(&mut state, &pending);
                    state.buffer = pending[consumed..].to_string();
                }
            }
        }
    }))
}

/// Split out every complete `\n\n`-terminated frame, returning how many
/// bytes of `input` were consumed.
fn drain_complete_frames(state: &mut SseState, input: &str) -> usize {
    let mut consumed = 0;
    while let Some(pos) = input[consumed..].find("\n\n") {
        let frame = &input[consumed..consumed + pos];
        push_frames(state, &format!("{frame}\n\n"));
        consumed += pos + 2;
    }
    consumed
}

fn push_frames(state: &mut SseState, frame: &str) {
    for line in frame.lines() {
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data.is_empty() {
            continue;
        }
        match serde_json::from_str::<serde_json::Value>(data) {
            Ok(value) => {
                if let Some(event) = (state.map_frame)(&value) {
                    state.ready.push_back(Ok(event));
                }
            }
            Err(_) => {
                tracing::debug!(agent_id = %state.agent_id, "skipping undecodable SSE frame");
            }
        }
    }
}

/// Health probe shared by the HTTP adapter family: 2xx is online, 5xx is
/// degraded, transport failure is offline. Non-network transports cannot be
/// probed from here and report unknown.
pub(crate) async fn probe_http_health(
    client: &reqwest::Client,
    manifest: &AgentManifest,
) -> AgentStatus {
    match manifest.endpoint.transport {
        TransportKind::Http | TransportKind::Ws => {}
        TransportKind::Local | TransportKind::Stdio => return AgentStatus::Unknown,
    }
    let base = manifest.endpoint.uri.trim_end_matches('/');
    let url = format!("{base}/health");
    match tokio::time::timeout(Duration::from_secs(5), client.get(&url).send()).await {
        Ok(Ok(response)) if response.status().is_success() => AgentStatus::Online,
        Ok(Ok(response)) if response.status().is_server_error() => AgentStatus::Degraded,
        Ok(Ok(_)) => AgentStatus::Degraded,
        _ => AgentStatus::Offline,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_kernel::manifest::CapabilityDescriptor;

    #[test]
    fn provider_selects_by_runtime_kind() {
        let provider = HttpAdapterProvider::new();
        let native = AgentManifest::new("a", "A", "http://a").with_runtime(RuntimeKind::Native);
        let zero = AgentManifest::new("b", "B", "http://b").with_runtime(RuntimeKind::ZeroStyle);
        let custom = AgentManifest::new("c", "C", "http://c").with_runtime(RuntimeKind::CustomHttp);
        // Construction must not panic; behavior is covered by adapter tests.
        let _ = provider.adapter_for(&native);
        let _ = provider.adapter_for(&zero);
        let _ = provider.adapter_for(&custom);
    }

    #[test]
    fn canonical_frame_parses_event_shape() {
        let v = serde_json::json!({"event": "token", "data": {"text": "hi"}});
        let event = canonical_frame(&v).unwrap();
        assert_eq!(event.kind, fabric_kernel::envelope::StreamEventKind::Token);
        assert!(canonical_frame(&serde_json::json!({"weird": true})).is_none());
    }

    #[tokio::test]
    async fn local_transport_probes_unknown() {
        let client = reqwest::Client::new();
        let mut manifest = AgentManifest::new("a", "A", "local:worker")
            .with_capability(CapabilityDescriptor::new("x"));
        manifest.endpoint.transport = TransportKind::Local;
        assert_eq!(probe_http_health(&client, &manifest).await, AgentStatus::Unknown);
    }
}
