//! Distributed trace context.
//!
//! Every inbound call gets exactly one [`TraceContext`]: the `trace_id` is
//! adopted from the caller when supplied (so multi-hop chains correlate) and
//! generated otherwise; the `span_id` is always fresh per execution attempt.
//! The trace is the one field guaranteed to appear on every response,
//! including error responses.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
}

impl TraceContext {
    /// Start a brand-new trace with no parent.
    pub fn root() -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
            span_id: Uuid::new_v4().to_string(),
            parent_span_id: None,
        }
    }

    /// Build a context from inbound wire fields.
    ///
    /// Adopts the caller's `trace_id` when present, otherwise generates one.
    /// The `span_id` is always freshly generated.
    pub fn from_inbound(trace_id: Option<&str>, parent_span_id: Option<&str>) -> Self {
        let trace_id = trace_id
            .filter(|t| !t.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Self {
            trace_id,
            span_id: Uuid::new_v4().to_string(),
            parent_span_id: parent_span_id.map(str::to_string),
        }
    }

    /// Extract a context from a call's `arguments.trace` object, if any.
    pub fn from_arguments(arguments: &serde_json::Value) -> Self {
        let trace = arguments.get("trace");
        Self::from_inbound(
            trace.and_then(|t| t.get("trace_id")).and_then(|v| v.as_str()),
            trace
                .and_then(|t| t.get("parent_span_id"))
                .and_then(|v| v.as_str()),
        )
    }

    /// Derive a child context for an outbound hop: same trace, fresh span,
    /// parented on the current span.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: Uuid::new_v4().to_string(),
            parent_span_id: Some(self.span_id.clone()),
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
