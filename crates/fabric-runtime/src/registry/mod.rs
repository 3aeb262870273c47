//! Agent registration and discovery.
//!
//! Two storage variants satisfy the same [`RegistryStore`] contract: the
//! in-memory variant bootstrapped from a manifest document, and the durable
//! variant with persistent tables plus health and call audit logs. The
//! pipeline is agnostic to which one it is handed.
//!
//! The registry is the single logical writer for manifests; readers get a
//! consistent snapshot per operation.

pub mod durable;
pub mod memory;

pub use durable::DurableRegistry;
pub use memory::MemoryRegistry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fabric_kernel::error::FabricResult;
use fabric_kernel::manifest::{AgentManifest, AgentStatus};

/// Filter for [`RegistryStore::list`]; any combination of fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AgentStatus>,
}

impl AgentFilter {
    pub fn matches(&self, manifest: &AgentManifest) -> bool {
        if let Some(cap) = &self.capability {
            if !manifest.has_capability(cap) {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            if !manifest.tags.iter().any(|t| t == tag) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if manifest.status != status {
                return false;
            }
        }
        true
    }
}

/// One candidate returned by a capability lookup, in routing-preference
/// order (priority 1 is the best candidate).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityHit {
    pub agent_id: String,
    pub priority: u32,
}

/// Agent counts per status, for the composite health snapshot.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StatusCounts {
    pub online: usize,
    pub degraded: usize,
    pub offline: usize,
    pub unknown: usize,
}

/// Sort manifests for stable listings: status rank first, then display
/// name. Both storage variants apply the same ordering.
pub(crate) fn stable_order(agents: &mut [AgentManifest]) {
    agents.sort_by(|a, b| {
        a.status
            .rank()
            .cmp(&b.status.rank())
            .then_with(|| a.display_name.cmp(&b.display_name))
    });
}

#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Insert or replace a manifest. Registration validates the manifest
    /// structurally before storing.
    async fn register(&self, manifest: AgentManifest) -> FabricResult<()>;

    /// Remove an agent. Returns whether it existed.
    async fn deregister(&self, agent_id: &str) -> FabricResult<bool>;

    async fn get(&self, agent_id: &str) -> FabricResult<Option<AgentManifest>>;

    /// Filtered listing in stable order (status rank, then display name).
    async fn list(&self, filter: &AgentFilter) -> FabricResult<Vec<AgentManifest>>;

    /// Agents exposing `capability`, best candidate first.
    async fn find_by_capability(&self, capability: &str) -> FabricResult<Vec<CapabilityHit>>;

    /// Update an agent's status. Monotone in `last_seen_at`: an update
    /// carrying an older timestamp than the stored one is ignored.
    async fn update_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
        last_seen_at: DateTime<Utc>,
    ) -> FabricResult<()>;

    /// Record a liveness signal without changing status.
    async fn heartbeat(&self, agent_id: &str) -> FabricResult<()>;

    async fn status_counts(&self) -> FabricResult<StatusCounts>;

    /// Audit hook: outcome of one health probe. No-op for the in-memory
    /// variant.
    async fn record_health_check(
        &self,
        _agent_id: &str,
        _status: AgentStatus,
        _latency_ms: u64,
    ) -> FabricResult<()> {
        Ok(())
    }

    /// Audit hook: one completed call. No-op for the in-memory variant.
    #[allow(clippy::too_many_arguments)]
    async fn record_call(
        &self,
        _trace_id: &str,
        _target_type: &str,
        _target_id: &str,
        _request: &serde_json::Value,
        _response: &serde_json::Value,
        _started_at: DateTime<Utc>,
        _completed_at: DateTime<Utc>,
    ) -> FabricResult<()> {
        Ok(())
    }
}
