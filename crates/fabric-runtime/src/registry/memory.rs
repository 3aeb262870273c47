//! In-memory registry variant.
//!
//! A `RwLock`-protected manifest map plus a capability index. Mutations go
//! through the write lock (single logical writer); reads clone a snapshot.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

use fabric_kernel::config::ManifestDocument;
use fabric_kernel::error::FabricResult;
use fabric_kernel::manifest::{AgentManifest, AgentStatus};

use super::{stable_order, AgentFilter, CapabilityHit, RegistryStore, StatusCounts};

/// Capability name → agent ids, kept in sync with the manifest map.
#[derive(Default)]
struct CapabilityIndex {
    by_capability: HashMap<String, Vec<String>>,
}

impl CapabilityIndex {
    fn index(&mut self, manifest: &AgentManifest) {
        for cap in &manifest.capabilities {
            self.by_capability
                .entry(cap.name.clone())
                .or_default()
                .push(manifest.agent_id.clone());
        }
    }

    fn unindex(&mut self, agent_id: &str) {
        for ids in self.by_capability.values_mut() {
            ids.retain(|id| id != agent_id);
        }
        self.by_capability.retain(|_, ids| !ids.is_empty());
    }

    fn find(&self, capability: &str) -> Vec<String> {
        self.by_capability
            .get(capability)
            .cloned()
            .unwrap_or_default()
    }
}

struct Inner {
    agents: HashMap<String, AgentManifest>,
    index: CapabilityIndex,
}

pub struct MemoryRegistry {
    inner: RwLock<Inner>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                agents: HashMap::new(),
                index: CapabilityIndex::default(),
            }),
        }
    }

    /// Bootstrap a registry from a manifest document. Agents enter with the
    /// status declared in the document (default `unknown`); the health
    /// monitor refines it from there.
    pub async fn from_document(doc: &ManifestDocument) -> FabricResult<Self> {
        let registry = Self::new();
        for manifest in &doc.agents {
            registry.register(manifest.clone()).await?;
        }
        Ok(registry)
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RegistryStore for MemoryRegistry {
    async fn register(&self, manifest: AgentManifest) -> FabricResult<()> {
        manifest.validate()?;
        let mut inner = self.inner.write().await;
        inner.index.unindex(&manifest.agent_id);
        inner.index.index(&manifest);
        info!(agent_id = %manifest.agent_id, display_name = %manifest.display_name, "registered agent");
        inner.agents.insert(manifest.agent_id.clone(), manifest);
        Ok(())
    }

    async fn deregister(&self, agent_id: &str) -> FabricResult<bool> {
        let mut inner = self.inner.write().await;
        inner.index.unindex(agent_id);
        let existed = inner.agents.remove(agent_id).is_some();
        if existed {
            info!(agent_id = %agent_id, "deregistered agent");
        }
        Ok(existed)
    }

    async fn get(&self, agent_id: &str) -> FabricResult<Option<AgentManifest>> {
        let inner = self.inner.read().await;
        Ok(inner.agents.get(agent_id).cloned())
    }

    async fn list(&self, filter: &AgentFilter) -> FabricResult<Vec<AgentManifest>> {
        let inner = self.inner.read().await;
        let mut agents: Vec<AgentManifest> = inner
            .agents
            .values()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect();
        drop(inner);
        stable_order(&mut agents);
        Ok(agents)
    }

    async fn find_by_capability(&self, capability: &str) -> FabricResult<Vec<CapabilityHit>> {
        let inner = self.inner.read().await;
        let mut candidates: Vec<AgentManifest> = inner
            .index
            .find(capability)
            .iter()
            .filter_map(|id| inner.agents.get(id).cloned())
            .collect();
        drop(inner);
        stable_order(&mut candidates);
        Ok(candidates
            .into_iter()
            .enumerate()
            .map(|(i, m)| CapabilityHit {
                agent_id: m.agent_id,
                priority: i as u32 + 1,
            })
            .collect())
    }

    async fn update_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
        last_seen_at: DateTime<Utc>,
    ) -> FabricResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(manifest) = inner.agents.get_mut(agent_id) {
            // A newer probe supersedes older state; stale updates are dropped.
            if manifest
                .last_seen_at
                .map(|seen| seen > last_seen_at)
                .unwrap_or(false)
            {
                return Ok(());
            }
            manifest.status = status;
            manifest.last_seen_at = Some(last_seen_at);
        }
        Ok(())
    }

    async fn heartbeat(&self, agent_id: &str) -> FabricResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(manifest) = inner.agents.get_mut(agent_id) {
            manifest.last_seen_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn status_counts(&self) -> FabricResult<StatusCounts> {
        let inner = self.inner.read().await;
        let mut counts = StatusCounts::default();
        for manifest in inner.agents.values() {
            match manifest.status {
                AgentStatus::Online => counts.online += 1,
                AgentStatus::Degraded => counts.degraded += 1,
                AgentStatus::Offline => counts.offline += 1,
                AgentStatus::Unknown => counts.unknown += 1,
            }
        }
        Ok(counts)
    }
}
