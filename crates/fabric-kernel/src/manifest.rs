//! Agent manifests and capability descriptors.
//!
//! Deserialization is deliberately permissive: unknown fields are preserved
//! in `extra` maps and missing optionals take defaults, so manifest
//! documents written against newer gateways still load.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::FabricError;

/// Health/availability state of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Online,
    Degraded,
    Unknown,
    Offline,
}

impl AgentStatus {
    /// Sort rank used for stable listings: online < degraded < unknown < offline.
    pub fn rank(&self) -> u8 {
        match self {
            AgentStatus::Online => 0,
            AgentStatus::Degraded => 1,
            AgentStatus::Unknown => 2,
            AgentStatus::Offline => 3,
        }
    }

    /// Whether the agent may be dispatched to.
    pub fn is_routable(&self) -> bool {
        matches!(self, AgentStatus::Online | AgentStatus::Degraded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Online => "online",
            AgentStatus::Degraded => "degraded",
            AgentStatus::Unknown => "unknown",
            AgentStatus::Offline => "offline",
        }
    }
}

impl Default for AgentStatus {
    fn default() -> Self {
        AgentStatus::Unknown
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AgentStatus {
    type Err = FabricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(AgentStatus::Online),
            "degraded" => Ok(AgentStatus::Degraded),
            "unknown" => Ok(AgentStatus::Unknown),
            "offline" => Ok(AgentStatus::Offline),
            other => Err(FabricError::bad_input(format!(
                "invalid agent status: {other}"
            ))),
        }
    }
}

/// Transport an agent endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Http,
    Ws,
    Local,
    Stdio,
}

impl Default for TransportKind {
    fn default() -> Self {
        TransportKind::Http
    }
}

/// Policy class gating sensitive operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustTier {
    Local,
    Org,
    Public,
}

impl Default for TrustTier {
    fn default() -> Self {
        TrustTier::Org
    }
}

/// Which adapter family an agent is dispatched through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum RuntimeKind {
    #[serde(rename = "native", alias = "mcp")]
    Native,
    #[serde(rename = "zero-style", alias = "agentzero")]
    ZeroStyle,
    #[serde(rename = "custom-http", alias = "custom")]
    CustomHttp,
}

impl Default for RuntimeKind {
    fn default() -> Self {
        RuntimeKind::Native
    }
}

impl RuntimeKind {
    pub fn adapter_name(&self) -> &'static str {
        match self {
            RuntimeKind::Native => "native",
            RuntimeKind::ZeroStyle => "zero-style",
            RuntimeKind::CustomHttp => "custom-http",
        }
    }
}

/// Network location of an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentEndpoint {
    #[serde(default)]
    pub transport: TransportKind,
    pub uri: String,
}

fn default_modalities() -> Vec<String> {
    vec!["text".to_string()]
}

fn default_timeout_ms() -> u64 {
    60_000
}

/// One named operation an agent can perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub streaming: bool,
    #[serde(default = "default_modalities")]
    pub modalities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
    #[serde(default = "default_timeout_ms")]
    pub max_timeout_ms: u64,
    /// Unknown fields are carried through untouched.
    #[serde(flatten, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl CapabilityDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            streaming: false,
            modalities: default_modalities(),
            input_schema: None,
            output_schema: None,
            max_timeout_ms: default_timeout_ms(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.max_timeout_ms = ms;
        self
    }
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// Complete registration record for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentManifest {
    pub agent_id: String,
    pub display_name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "runtime")]
    pub runtime_kind: RuntimeKind,
    pub endpoint: AgentEndpoint,
    #[serde(default)]
    pub capabilities: Vec<CapabilityDescriptor>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub trust_tier: TrustTier,
    #[serde(default)]
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<DateTime<Utc>>,
    #[serde(flatten, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl AgentManifest {
    pub fn new(agent_id: impl Into<String>, display_name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            display_name: display_name.into(),
            version: default_version(),
            description: String::new(),
            runtime_kind: RuntimeKind::Native,
            endpoint: AgentEndpoint {
                transport: TransportKind::Http,
                uri: uri.into(),
            },
            capabilities: Vec::new(),
            tags: Vec::new(),
            trust_tier: TrustTier::Org,
            status: AgentStatus::Unknown,
            last_seen_at: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_capability(mut self, capability: CapabilityDescriptor) -> Self {
        self.capabilities.push(capability);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_runtime(mut self, kind: RuntimeKind) -> Self {
        self.runtime_kind = kind;
        self
    }

    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = status;
        self
    }

    /// Look up a capability by name.
    pub fn capability(&self, name: &str) -> Option<&CapabilityDescriptor> {
        self.capabilities.iter().find(|c| c.name == name)
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.capability(name).is_some()
    }

    /// Structural validation applied on registration.
    pub fn validate(&self) -> Result<(), FabricError> {
        if self.agent_id.trim().is_empty() {
            return Err(FabricError::bad_input("agent_id must not be empty"));
        }
        if !self
            .agent_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(FabricError::bad_input(format!(
                "agent_id must be URL-safe: {}",
                self.agent_id
            )));
        }
        if self.endpoint.uri.trim().is_empty() {
            return Err(FabricError::bad_input("endpoint.uri must not be empty"));
        }
        let mut seen = std::collections::HashSet::new();
        for cap in &self.capabilities {
            if cap.name.trim().is_empty() {
                return Err(FabricError::bad_input("capability name must not be empty"));
            }
            if !seen.insert(cap.name.as_str()) {
                return Err(FabricError::bad_input(format!(
                    "duplicate capability: {}",
                    cap.name
                )));
            }
        }
        Ok(())
    }
}
