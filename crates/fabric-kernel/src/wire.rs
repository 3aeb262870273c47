//! Wire envelopes.
//!
//! Every transport returns the same JSON shape: `{ok, trace, result}` on
//! success, `{ok: false, trace, result: null, error: {code, message,
//! details}}` on failure. The trace block is always present.

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, FabricError};
use crate::trace::TraceContext;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl From<&FabricError> for WireError {
    fn from(err: &FabricError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            details: err.details.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireResponse {
    pub ok: bool,
    pub trace: TraceContext,
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl WireResponse {
    pub fn success(trace: TraceContext, result: serde_json::Value) -> Self {
        Self {
            ok: true,
            trace,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(trace: TraceContext, err: &FabricError) -> Self {
        Self {
            ok: false,
            trace,
            result: None,
            error: Some(WireError::from(err)),
        }
    }

    /// HTTP status this response maps to on the HTTP front.
    pub fn http_status(&self) -> u16 {
        match &self.error {
            Some(e) => e.code.http_status(),
            None => 200,
        }
    }
}
