//! Message-bus tunables.

use std::time::Duration;

/// Configuration for [`FabricMessageBus`](super::FabricMessageBus).
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Suffix appended to the agent id for the default consumer group.
    pub group_suffix: String,
    /// How long a delivered entry stays invisible to other consumers in the
    /// same group before it becomes redeliverable.
    pub visibility_horizon: Duration,
    /// Per-inbox retention bound; oldest entries are trimmed past this.
    pub max_stream_len: usize,
    /// Consumer name used for group reads; defaults to `<agent_id>_<pid>`.
    pub consumer_name: Option<String>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            group_suffix: "_workers".to_string(),
            visibility_horizon: Duration::from_secs(30),
            max_stream_len: 10_000,
            consumer_name: None,
        }
    }
}

impl BusConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_visibility_horizon(mut self, horizon: Duration) -> Self {
        self.visibility_horizon = horizon;
        self
    }

    pub fn with_max_stream_len(mut self, maxlen: usize) -> Self {
        self.max_stream_len = maxlen;
        self
    }

    pub fn with_consumer_name(mut self, name: impl Into<String>) -> Self {
        self.consumer_name = Some(name.into());
        self
    }
}
