//! The canonical in-process call envelope and streamed events.
//!
//! Every dispatched call — agent, tool, or message op — is normalized into a
//! [`CanonicalEnvelope`] before it reaches an adapter. Streaming responses
//! are lazy sequences of [`StreamEvent`]s; the terminal event is always of
//! kind `final`, an invariant [`enforce_terminal_final`] guarantees no
//! matter what the upstream emits.

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::auth::AuthContext;
use crate::error::{FabricError, FabricResult};
use crate::trace::TraceContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Agent,
    Tool,
    Message,
}

/// What the call is addressed to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallTarget {
    pub kind: TargetKind,
    pub id: String,
    pub capability: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Normalized call input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default)]
    pub context: serde_json::Value,
    #[serde(default)]
    pub attachments: Vec<serde_json::Value>,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    Text,
    Json,
}

impl Default for ResponseFormat {
    fn default() -> Self {
        ResponseFormat::Text
    }
}

/// How the caller wants the response delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseSpec {
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub format: ResponseFormat,
}

impl Default for ResponseSpec {
    fn default() -> Self {
        Self {
            stream: false,
            format: ResponseFormat::Text,
        }
    }
}

/// The normalized in-process form of every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalEnvelope {
    pub trace: TraceContext,
    pub auth: AuthContext,
    pub target: CallTarget,
    pub input: CallInput,
    pub response: ResponseSpec,
}

impl CanonicalEnvelope {
    /// Effective deadline for this call: the explicit target timeout, or
    /// the supplied capability default.
    pub fn timeout_ms(&self, capability_default: u64) -> u64 {
        self.target.timeout_ms.unwrap_or(capability_default)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Streamed events
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventKind {
    Status,
    Token,
    ToolCall,
    Progress,
    Final,
}

/// One event in a streamed response, serialized as `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "event")]
    pub kind: StreamEventKind,
    pub data: serde_json::Value,
}

impl StreamEvent {
    pub fn status(message: impl Into<String>, trace: &TraceContext) -> Self {
        Self {
            kind: StreamEventKind::Status,
            data: serde_json::json!({
                "status": "running",
                "message": message.into(),
                "trace": trace,
            }),
        }
    }

    pub fn token(text: impl Into<String>, trace: &TraceContext) -> Self {
        Self {
            kind: StreamEventKind::Token,
            data: serde_json::json!({ "text": text.into(), "trace": trace }),
        }
    }

    pub fn progress(percent: u8, message: impl Into<String>, trace: &TraceContext) -> Self {
        Self {
            kind: StreamEventKind::Progress,
            data: serde_json::json!({
                "percent": percent,
                "message": message.into(),
                "trace": trace,
            }),
        }
    }

    /// Terminal success event carrying the canonical success envelope.
    pub fn final_ok(result: serde_json::Value, trace: &TraceContext) -> Self {
        Self {
            kind: StreamEventKind::Final,
            data: serde_json::json!({ "ok": true, "result": result, "trace": trace }),
        }
    }

    /// Terminal failure event carrying the canonical failure envelope.
    pub fn final_err(error: &FabricError, trace: &TraceContext) -> Self {
        Self {
            kind: StreamEventKind::Final,
            data: serde_json::json!({
                "ok": false,
                "result": null,
                "error": {
                    "code": error.code,
                    "message": error.message,
                    "details": error.details,
                },
                "trace": trace,
            }),
        }
    }

    pub fn is_final(&self) -> bool {
        self.kind == StreamEventKind::Final
    }
}

/// Blanket trait for event streams (mirrors the token-stream pattern).
pub trait EventStream: Stream<Item = FabricResult<StreamEvent>> + Send {}
impl<T> EventStream for T where T: Stream<Item = FabricResult<StreamEvent>> + Send {}

/// Type-erased event stream.
pub type BoxEventStream = Pin<Box<dyn EventStream>>;

/// Wrap an upstream event sequence so that the terminal-`final` contract
/// holds:
///
/// - nothing is yielded after a `final` event;
/// - an upstream error becomes a failure `final`;
/// - an upstream that ends without a `final` gets one synthesized.
pub fn enforce_terminal_final(upstream: BoxEventStream, trace: TraceContext) -> BoxEventStream {
    let stream = futures::stream::unfold(
        (upstream, trace, false),
        |(mut upstream, trace, finished)| async move {
            if finished {
                return None;
            }
            match upstream.next().await {
                Some(Ok(event)) => {
                    let done = event.is_final();
                    Some((Ok(event), (upstream, trace, done)))
                }
                Some(Err(err)) => {
                    let event = StreamEvent::final_err(&err, &trace);
                    Some((Ok(event), (upstream, trace, true)))
                }
                None => {
                    let err = FabricError::internal("stream ended without a final event");
                    let event = StreamEvent::final_err(&err, &trace);
                    Some((Ok(event), (upstream, trace, true)))
                }
            }
        },
    );
    Box::pin(stream)
}

/// A one-event stream carrying a synthetic `final`. Used when streaming is
/// requested on a non-streaming capability and the call degrades to sync.
pub fn single_final(event: StreamEvent) -> BoxEventStream {
    Box::pin(futures::stream::iter([Ok(event)]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use futures::StreamExt;

    fn trace() -> TraceContext {
        TraceContext::root()
    }

    #[tokio::test]
    async fn terminal_final_is_appended_when_missing() {
        let t = trace();
        let upstream: BoxEventStream = Box::pin(futures::stream::iter([
            Ok(StreamEvent::status("starting", &t)),
            Ok(StreamEvent::token("hi", &t)),
        ]));
        let events: Vec<_> = enforce_terminal_final(upstream, t)
            .map(|e| e.unwrap())
            .collect()
            .await;
        assert_eq!(events.len(), 3);
        assert!(events.last().unwrap().is_final());
        assert_eq!(events.last().unwrap().data["ok"], false);
    }

    #[tokio::test]
    async fn nothing_follows_final() {
        let t = trace();
        let upstream: BoxEventStream = Box::pin(futures::stream::iter([
            Ok(StreamEvent::final_ok(serde_json::json!({"answer": 42}), &t)),
            Ok(StreamEvent::token("stray", &t)),
        ]));
        let events: Vec<_> = enforce_terminal_final(upstream, t)
            .map(|e| e.unwrap())
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_final());
        assert_eq!(events[0].data["ok"], true);
    }

    #[tokio::test]
    async fn upstream_error_becomes_failure_final() {
        let t = trace();
        let upstream: BoxEventStream = Box::pin(futures::stream::iter([
            Ok(StreamEvent::status("starting", &t)),
            Err(FabricError::timeout("call", 100)),
        ]));
        let events: Vec<_> = enforce_terminal_final(upstream, t)
            .map(|e| e.unwrap())
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        let last = events.last().unwrap();
        assert!(last.is_final());
        assert_eq!(
            last.data["error"]["code"],
            serde_json::json!(ErrorCode::Timeout)
        );
    }

    #[test]
    fn event_wire_shape() {
        let t = trace();
        let v = serde_json::to_value(StreamEvent::token("abc", &t)).unwrap();
        assert_eq!(v["event"], "token");
        assert_eq!(v["data"]["text"], "abc");
        assert_eq!(v["data"]["trace"]["trace_id"], t.trace_id);
    }

    #[test]
    fn envelope_timeout_prefers_explicit() {
        let env = CanonicalEnvelope {
            trace: trace(),
            auth: crate::auth::AuthContext::local(),
            target: CallTarget {
                kind: TargetKind::Agent,
                id: "a".into(),
                capability: "reason".into(),
                timeout_ms: Some(5_000),
            },
            input: CallInput::default(),
            response: ResponseSpec::default(),
        };
        assert_eq!(env.timeout_ms(60_000), 5_000);
        let mut env = env;
        env.target.timeout_ms = None;
        assert_eq!(env.timeout_ms(60_000), 60_000);
    }
}
