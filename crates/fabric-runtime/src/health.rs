//! Background health probing.
//!
//! Iterates probeable agents at a fixed cadence and applies the demotion
//! ladder: two consecutive probe failures demote online → degraded, three
//! more demote degraded → offline, one success promotes straight back to
//! online. Agents with no heartbeat inside the staleness window go offline
//! regardless of probe results.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use fabric_kernel::manifest::AgentStatus;

use crate::adapter::AdapterProvider;
use crate::registry::{AgentFilter, RegistryStore};

#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Probe cadence.
    pub interval: Duration,
    /// Heartbeat staleness window; agents silent longer than this go offline.
    pub staleness: Duration,
    /// Consecutive failures before online demotes to degraded.
    pub demote_online_after: u32,
    /// Consecutive failures before degraded demotes to offline.
    pub demote_degraded_after: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            staleness: Duration::from_secs(60),
            demote_online_after: 2,
            demote_degraded_after: 3,
        }
    }
}

pub struct HealthMonitor {
    registry: Arc<dyn RegistryStore>,
    adapters: Arc<dyn AdapterProvider>,
    config: HealthConfig,
    /// Consecutive probe failures per agent, reset on success or demotion.
    failures: Mutex<HashMap<String, u32>>,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<dyn RegistryStore>,
        adapters: Arc<dyn AdapterProvider>,
        config: HealthConfig,
    ) -> Self {
        Self {
            registry,
            adapters,
            config,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Run the monitor on its cadence until the task is aborted.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.tick().await;
            }
        })
    }

    /// One probing pass. Public so tests can drive the ladder directly.
    pub async fn tick(&self) {
        let agents = match self.registry.list(&AgentFilter::default()).await {
            Ok(agents) => agents,
            Err(err) => {
                warn!(error = %err, "health pass skipped: registry unavailable");
                return;
            }
        };

        for manifest in agents {
            // Offline agents re-enter through registration or heartbeat, not
            // probing. Unknown agents are probed so freshly loaded manifests
            // converge to a real status.
            if manifest.status == AgentStatus::Offline {
                continue;
            }

            let adapter = self.adapters.adapter_for(&manifest);
            let started = Instant::now();
            let probed = adapter.probe_health().await;
            let latency_ms = started.elapsed().as_millis() as u64;

            if let Err(err) = self
                .registry
                .record_health_check(&manifest.agent_id, probed, latency_ms)
                .await
            {
                debug!(agent_id = %manifest.agent_id, error = %err, "health audit write failed");
            }

            match probed {
                AgentStatus::Online => {
                    self.failures.lock().unwrap().remove(&manifest.agent_id);
                    if manifest.status != AgentStatus::Online {
                        info!(agent_id = %manifest.agent_id, "agent promoted to online");
                    }
                    let _ = self
                        .registry
                        .update_status(&manifest.agent_id, AgentStatus::Online, Utc::now())
                        .await;
                }
                AgentStatus::Unknown => {
                    // Transport cannot be probed from here; staleness still applies.
                }
                AgentStatus::Degraded | AgentStatus::Offline => {
                    let count = {
                        let mut failures = self.failures.lock().unwrap();
                        let count = failures.entry(manifest.agent_id.clone()).or_insert(0);
                        *count += 1;
                        *count
                    };
                    self.apply_demotion(&manifest.agent_id, manifest.status, count)
                        .await;
                }
            }

            // Staleness overrides: a silent agent is offline no matter what
            // the probe just said about the endpoint.
            if let Some(last_seen) = manifest.last_seen_at {
                let silent = Utc::now().signed_duration_since(last_seen);
                if silent.to_std().unwrap_or_default() > self.config.staleness
                    && probed != AgentStatus::Online
                {
                    warn!(agent_id = %manifest.agent_id, "agent heartbeat stale, marking offline");
                    let _ = self
                        .registry
                        .update_status(&manifest.agent_id, AgentStatus::Offline, Utc::now())
                        .await;
                }
            }
        }
    }

    async fn apply_demotion(&self, agent_id: &str, current: AgentStatus, failures: u32) {
        let next = match current {
            AgentStatus::Online if failures >= self.config.demote_online_after => {
                Some(AgentStatus::Degraded)
            }
            AgentStatus::Degraded | AgentStatus::Unknown
                if failures >= self.config.demote_degraded_after =>
            {
                Some(AgentStatus::Offline)
            }
            _ => None,
        };

        if let Some(next) = next {
            warn!(agent_id = %agent_id, from = %current, to = %next, failures, "agent demoted");
            self.failures.lock().unwrap().remove(agent_id);
            let _ = self
                .registry
                .update_status(agent_id, next, Utc::now())
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::RuntimeAdapter;
    use crate::registry::MemoryRegistry;
    use async_trait::async_trait;
    use fabric_kernel::envelope::{BoxEventStream, CanonicalEnvelope};
    use fabric_kernel::error::FabricResult;
    use fabric_kernel::manifest::{AgentManifest, CapabilityDescriptor};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct ScriptedAdapter {
        manifest: AgentManifest,
        healthy: Arc<AtomicBool>,
    }

    #[async_trait]
    impl RuntimeAdapter for ScriptedAdapter {
        async fn call(&self, _: &CanonicalEnvelope) -> FabricResult<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }

        async fn call_stream(&self, _: &CanonicalEnvelope) -> FabricResult<BoxEventStream> {
            unimplemented!("not exercised by health tests")
        }

        async fn probe_health(&self) -> AgentStatus {
            if self.healthy.load(Ordering::SeqCst) {
                AgentStatus::Online
            } else {
                AgentStatus::Offline
            }
        }

        async fn describe(&self) -> FabricResult<AgentManifest> {
            Ok(self.manifest.clone())
        }
    }

    struct ScriptedProvider {
        healthy: Arc<AtomicBool>,
    }

    impl AdapterProvider for ScriptedProvider {
        fn adapter_for(&self, manifest: &AgentManifest) -> Arc<dyn RuntimeAdapter> {
            Arc::new(ScriptedAdapter {
                manifest: manifest.clone(),
                healthy: self.healthy.clone(),
            })
        }
    }

    async fn setup(initial: AgentStatus) -> (Arc<MemoryRegistry>, Arc<AtomicBool>, HealthMonitor) {
        let registry = Arc::new(MemoryRegistry::new());
        registry
            .register(
                AgentManifest::new("a", "A", "http://a:9000")
                    .with_capability(CapabilityDescriptor::new("x"))
                    .with_status(initial),
            )
            .await
            .unwrap();
        let healthy = Arc::new(AtomicBool::new(true));
        let monitor = HealthMonitor::new(
            registry.clone(),
            Arc::new(ScriptedProvider {
                healthy: healthy.clone(),
            }),
            HealthConfig::default(),
        );
        (registry, healthy, monitor)
    }

    async fn status_of(registry: &MemoryRegistry, id: &str) -> AgentStatus {
        registry.get(id).await.unwrap().unwrap().status
    }

    #[tokio::test]
    async fn one_success_promotes_to_online() {
        let (registry, _healthy, monitor) = setup(AgentStatus::Degraded).await;
        monitor.tick().await;
        assert_eq!(status_of(&registry, "a").await, AgentStatus::Online);
    }

    #[tokio::test]
    async fn two_failures_demote_online_to_degraded() {
        let (registry, healthy, monitor) = setup(AgentStatus::Online).await;
        healthy.store(false, Ordering::SeqCst);

        monitor.tick().await;
        assert_eq!(status_of(&registry, "a").await, AgentStatus::Online);

        monitor.tick().await;
        assert_eq!(status_of(&registry, "a").await, AgentStatus::Degraded);
    }

    #[tokio::test]
    async fn three_more_failures_demote_degraded_to_offline() {
        let (registry, healthy, monitor) = setup(AgentStatus::Degraded).await;
        healthy.store(false, Ordering::SeqCst);

        for _ in 0..2 {
            monitor.tick().await;
            assert_eq!(status_of(&registry, "a").await, AgentStatus::Degraded);
        }
        monitor.tick().await;
        assert_eq!(status_of(&registry, "a").await, AgentStatus::Offline);
    }

    #[tokio::test]
    async fn offline_agents_are_not_probed() {
        let (registry, _healthy, monitor) = setup(AgentStatus::Offline).await;
        monitor.tick().await;
        // A healthy endpoint does not resurrect an offline agent by itself.
        assert_eq!(status_of(&registry, "a").await, AgentStatus::Offline);
    }

    #[tokio::test]
    async fn recovery_resets_the_failure_ladder() {
        let (registry, healthy, monitor) = setup(AgentStatus::Online).await;
        healthy.store(false, Ordering::SeqCst);
        monitor.tick().await; // one failure

        healthy.store(true, Ordering::SeqCst);
        monitor.tick().await; // success resets
        assert_eq!(status_of(&registry, "a").await, AgentStatus::Online);

        healthy.store(false, Ordering::SeqCst);
        monitor.tick().await; // failure count restarts at 1
        assert_eq!(status_of(&registry, "a").await, AgentStatus::Online);
    }
}
