//! # fabric-plugins
//!
//! The tool plugin host and the built-in tool set.
//!
//! A tool declares a dotted `tool_id` (e.g. `math.calculate`), a mapping
//! from capability name to dispatch method, and optional safety
//! constraints. The [`ToolHost`] is a static registry built once at
//! startup — dynamic dispatch by tool name is a map lookup, and new
//! plugins require a restart; no runtime code loading is assumed.

pub mod safety;
pub mod tools;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use fabric_kernel::error::{ErrorCode, FabricError, FabricResult};
use fabric_kernel::manifest::TrustTier;

pub use safety::{CommandPolicy, EnvPolicy, PathPolicy};
pub use tools::{builtin_tool_host, BuiltinToolsConfig};

// ─────────────────────────────────────────────────────────────────────────────
// Descriptors
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolProvider {
    Builtin,
    External,
    Mcp,
}

/// One capability a tool exposes, mapped to its dispatch method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityMeta {
    /// Name of the method the capability dispatches to.
    pub method: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the capability's parameters.
    #[serde(default)]
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub tool_id: String,
    /// Dotted-id prefix, e.g. `math` for `math.calculate`.
    pub category: String,
    pub provider: ToolProvider,
    pub description: String,
    pub capabilities: BTreeMap<String, CapabilityMeta>,
    pub trust_tier: TrustTier,
}

impl ToolDescriptor {
    pub fn builtin(tool_id: impl Into<String>, description: impl Into<String>) -> Self {
        let tool_id = tool_id.into();
        let category = tool_id
            .split('.')
            .next()
            .unwrap_or("general")
            .to_string();
        Self {
            tool_id,
            category,
            provider: ToolProvider::Builtin,
            description: description.into(),
            capabilities: BTreeMap::new(),
            trust_tier: TrustTier::Org,
        }
    }

    pub fn with_capability(
        mut self,
        name: impl Into<String>,
        method: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        self.capabilities.insert(
            name.into(),
            CapabilityMeta {
                method: method.into(),
                description: description.into(),
                input_schema,
            },
        );
        self
    }

    pub fn with_trust_tier(mut self, tier: TrustTier) -> Self {
        self.trust_tier = tier;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool contract
// ─────────────────────────────────────────────────────────────────────────────

/// Tool-level failure; surfaced to callers inside `TOOL_EXECUTION_ERROR`
/// with the tool-defined sub-code under `details.tool_code`.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct ToolError {
    pub code: String,
    pub message: String,
    pub details: serde_json::Value,
}

impl ToolError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

pub type ToolOutcome = Result<serde_json::Value, ToolError>;

#[async_trait]
pub trait FabricTool: Send + Sync {
    fn descriptor(&self) -> &ToolDescriptor;

    /// Dispatch a capability call. The host has already checked that the
    /// capability exists in the descriptor, so implementations match on
    /// the capability name directly.
    async fn execute(&self, capability: &str, params: serde_json::Value) -> ToolOutcome;
}

// ─────────────────────────────────────────────────────────────────────────────
// Parameter helpers shared by the built-in tools
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) mod params {
    use super::ToolError;

    pub fn require_str<'a>(params: &'a serde_json::Value, key: &str) -> Result<&'a str, ToolError> {
        params
            .get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::new("MISSING_PARAM", format!("'{key}' is required")))
    }

    pub fn opt_str<'a>(params: &'a serde_json::Value, key: &str) -> Option<&'a str> {
        params.get(key).and_then(|v| v.as_str())
    }

    pub fn opt_bool(params: &serde_json::Value, key: &str, default: bool) -> bool {
        params.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    pub fn opt_u64(params: &serde_json::Value, key: &str, default: u64) -> u64 {
        params.get(key).and_then(|v| v.as_u64()).unwrap_or(default)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Host
// ─────────────────────────────────────────────────────────────────────────────

/// Static tool registry; shared across request tasks behind an `Arc`.
pub struct ToolHost {
    tools: HashMap<String, Arc<dyn FabricTool>>,
}

impl ToolHost {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register<T: FabricTool + 'static>(&mut self, tool: T) {
        let tool_id = tool.descriptor().tool_id.clone();
        debug!(tool_id = %tool_id, "registered tool");
        self.tools.insert(tool_id, Arc::new(tool));
    }

    pub fn count(&self) -> usize {
        self.tools.len()
    }

    pub fn tool_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tools.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Filtered descriptor listing, sorted by tool id.
    pub fn list_tools(
        &self,
        category: Option<&str>,
        provider: Option<ToolProvider>,
    ) -> Vec<ToolDescriptor> {
        let mut out: Vec<ToolDescriptor> = self
            .tools
            .values()
            .map(|t| t.descriptor().clone())
            .filter(|d| category.map(|c| d.category == c).unwrap_or(true))
            .filter(|d| provider.map(|p| d.provider == p).unwrap_or(true))
            .collect();
        out.sort_by(|a, b| a.tool_id.cmp(&b.tool_id));
        out
    }

    pub fn describe_tool(&self, tool_id: &str) -> Option<ToolDescriptor> {
        self.tools.get(tool_id).map(|t| t.descriptor().clone())
    }

    /// Resolve `(tool_id, capability)`, enforce the trust gate, validate the
    /// capability exists, and dispatch.
    pub async fn execute_tool(
        &self,
        tool_id: &str,
        capability: &str,
        params: serde_json::Value,
        caller_tier: TrustTier,
    ) -> FabricResult<serde_json::Value> {
        let tool = self
            .tools
            .get(tool_id)
            .ok_or_else(|| FabricError::tool_not_found(tool_id))?;
        let descriptor = tool.descriptor();

        if !descriptor.capabilities.contains_key(capability) {
            return Err(FabricError::capability_not_found(
                capability,
                &format!("tool {tool_id}"),
            ));
        }

        // Local-tier tools refuse callers above their tier.
        if descriptor.trust_tier == TrustTier::Local && caller_tier != TrustTier::Local {
            return Err(FabricError::new(
                ErrorCode::ToolExecutionError,
                format!("Tool {tool_id} requires local trust tier"),
            )
            .with_details(serde_json::json!({ "tool_code": "TRUST_DENIED" })));
        }

        info!(tool_id = %tool_id, capability = %capability, "executing tool");
        tool.execute(capability, params).await.map_err(|err| {
            FabricError::new(
                ErrorCode::ToolExecutionError,
                format!("Tool {tool_id} failed: {}", err.message),
            )
            .with_details(serde_json::json!({
                "tool_code": err.code,
                "tool_details": err.details,
            }))
        })
    }
}

impl Default for ToolHost {
    fn default() -> Self {
        Self::new()
    }
}
