//! Canonical error codes and the gateway error type.
//!
//! Every failure that crosses the wire is a [`FabricError`]: a canonical
//! [`ErrorCode`], a sanitized human-readable message, and an optional
//! structured `details` object. Raw upstream exception text is never placed
//! in `message`; adapters and the tool host wrap foreign failures before
//! they reach the pipeline.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical wire error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    BadInput,
    AuthDenied,
    AuthInvalid,
    AuthExpired,
    AgentNotFound,
    AgentOffline,
    CapabilityNotFound,
    ToolNotFound,
    ToolExecutionError,
    Timeout,
    UpstreamError,
    BusUnavailable,
    RateLimited,
    InternalError,
}

impl ErrorCode {
    /// The HTTP status this code maps to on the HTTP front.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::BadInput => 400,
            ErrorCode::AuthDenied | ErrorCode::AuthInvalid | ErrorCode::AuthExpired => 401,
            ErrorCode::AgentNotFound | ErrorCode::ToolNotFound | ErrorCode::CapabilityNotFound => {
                404
            }
            ErrorCode::Timeout => 408,
            ErrorCode::RateLimited => 429,
            ErrorCode::ToolExecutionError => 422,
            ErrorCode::UpstreamError => 502,
            ErrorCode::AgentOffline | ErrorCode::BusUnavailable => 503,
            ErrorCode::InternalError => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::BadInput => "BAD_INPUT",
            ErrorCode::AuthDenied => "AUTH_DENIED",
            ErrorCode::AuthInvalid => "AUTH_INVALID",
            ErrorCode::AuthExpired => "AUTH_EXPIRED",
            ErrorCode::AgentNotFound => "AGENT_NOT_FOUND",
            ErrorCode::AgentOffline => "AGENT_OFFLINE",
            ErrorCode::CapabilityNotFound => "CAPABILITY_NOT_FOUND",
            ErrorCode::ToolNotFound => "TOOL_NOT_FOUND",
            ErrorCode::ToolExecutionError => "TOOL_EXECUTION_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::UpstreamError => "UPSTREAM_ERROR",
            ErrorCode::BusUnavailable => "BUS_UNAVAILABLE",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error type carried through the pipeline and shaped onto the wire.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct FabricError {
    pub code: ErrorCode,
    pub message: String,
    pub details: serde_json::Value,
}

pub type FabricResult<T> = Result<T, FabricError>;

impl FabricError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn bad_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadInput, message)
    }

    pub fn agent_not_found(agent_id: &str) -> Self {
        Self::new(
            ErrorCode::AgentNotFound,
            format!("Agent not found: {agent_id}"),
        )
    }

    pub fn agent_offline(agent_id: &str) -> Self {
        Self::new(ErrorCode::AgentOffline, format!("Agent is offline: {agent_id}"))
    }

    pub fn capability_not_found(capability: &str, target: &str) -> Self {
        Self::new(
            ErrorCode::CapabilityNotFound,
            format!("Capability not found: {capability} on {target}"),
        )
    }

    pub fn tool_not_found(tool_id: &str) -> Self {
        Self::new(ErrorCode::ToolNotFound, format!("Tool not found: {tool_id}"))
    }

    pub fn timeout(what: &str, after_ms: u64) -> Self {
        Self::new(
            ErrorCode::Timeout,
            format!("{what} timed out after {after_ms}ms"),
        )
    }

    pub fn bus_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BusUnavailable, message)
    }

    /// Internal invariant violations. The wire message is generic; the
    /// caller is expected to log the underlying cause with full trace
    /// context before constructing this.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}
