//! Shared fixtures: a scripted adapter provider so pipeline behavior can be
//! exercised without live agent endpoints.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use fabric_gateway::pipeline::{FabricPipeline, PipelineConfig};
use fabric_kernel::auth::AuthVerifier;
use fabric_kernel::bus::FabricMessageBus;
use fabric_kernel::envelope::{BoxEventStream, CanonicalEnvelope, StreamEvent};
use fabric_kernel::error::{FabricError, FabricResult};
use fabric_kernel::manifest::{AgentManifest, AgentStatus, CapabilityDescriptor};
use fabric_plugins::{builtin_tool_host, BuiltinToolsConfig};
use fabric_runtime::adapter::{AdapterProvider, RuntimeAdapter};
use fabric_runtime::registry::{MemoryRegistry, RegistryStore};

pub const TEST_PSK: &str = "test-shared-secret";

/// What a scripted agent does when called.
#[derive(Clone)]
pub enum Behavior {
    Reply(serde_json::Value),
    Offline,
    Stream(Vec<StreamEvent>),
}

struct ScriptedAdapter {
    manifest: AgentManifest,
    behavior: Behavior,
}

#[async_trait]
impl RuntimeAdapter for ScriptedAdapter {
    async fn call(&self, envelope: &CanonicalEnvelope) -> FabricResult<serde_json::Value> {
        match &self.behavior {
            Behavior::Reply(value) => Ok(value.clone()),
            Behavior::Offline => Err(FabricError::agent_offline(&envelope.target.id)),
            Behavior::Stream(_) => Ok(serde_json::json!({ "note": "sync path" })),
        }
    }

    async fn call_stream(&self, envelope: &CanonicalEnvelope) -> FabricResult<BoxEventStream> {
        match &self.behavior {
            Behavior::Stream(events) => {
                let items: Vec<FabricResult<StreamEvent>> =
                    events.iter().cloned().map(Ok).collect();
                Ok(Box::pin(futures::stream::iter(items)))
            }
            Behavior::Offline => Err(FabricError::agent_offline(&envelope.target.id)),
            Behavior::Reply(value) => {
                let event = StreamEvent::final_ok(value.clone(), &envelope.trace);
                Ok(Box::pin(futures::stream::iter([Ok(event)])))
            }
        }
    }

    async fn probe_health(&self) -> AgentStatus {
        AgentStatus::Online
    }

    async fn describe(&self) -> FabricResult<AgentManifest> {
        Ok(self.manifest.clone())
    }
}

pub struct ScriptedProvider {
    behaviors: HashMap<String, Behavior>,
}

impl AdapterProvider for ScriptedProvider {
    fn adapter_for(&self, manifest: &AgentManifest) -> Arc<dyn RuntimeAdapter> {
        let behavior = self
            .behaviors
            .get(&manifest.agent_id)
            .cloned()
            .unwrap_or(Behavior::Offline);
        Arc::new(ScriptedAdapter {
            manifest: manifest.clone(),
            behavior,
        })
    }
}

pub fn agent(id: &str, name: &str, capabilities: &[(&str, bool)]) -> AgentManifest {
    let mut manifest = AgentManifest::new(id, name, format!("http://{id}.test:9000"))
        .with_status(AgentStatus::Online);
    for (cap, streaming) in capabilities {
        manifest = manifest.with_capability(CapabilityDescriptor::new(*cap).with_streaming(*streaming));
    }
    manifest
}

/// A pipeline over scripted agents, the in-memory registry and bus, and the
/// full built-in tool host.
pub async fn pipeline_with(agents: Vec<(AgentManifest, Behavior)>) -> Arc<FabricPipeline> {
    let registry = Arc::new(MemoryRegistry::new());
    let mut behaviors = HashMap::new();
    for (manifest, behavior) in agents {
        behaviors.insert(manifest.agent_id.clone(), behavior);
        registry.register(manifest).await.unwrap();
    }

    Arc::new(FabricPipeline::new(
        registry,
        Arc::new(ScriptedProvider { behaviors }),
        Arc::new(builtin_tool_host(BuiltinToolsConfig::default())),
        FabricMessageBus::in_memory(),
        AuthVerifier::new(TEST_PSK),
        PipelineConfig::default(),
    ))
}

pub async fn empty_pipeline() -> Arc<FabricPipeline> {
    pipeline_with(Vec::new()).await
}
