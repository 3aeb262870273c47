//! Async agent-to-agent message bus.
//!
//! Persistent per-agent inboxes (ordered streams + consumer groups) plus
//! topic pub/sub, layered over a pluggable [`StreamStore`]:
//!
//! - inbox stream `agent:{agent_id}:inbox`, one per agent
//! - default consumer group `{agent_id}_workers`, overridable per receive
//! - topics are free-form strings (`shared:*`, `agent.*`, `analytics.*`,
//!   `system.*` by convention) and are not persisted
//!
//! Delivery is at-least-once into each consumer group: an entry stays in the
//! group's pending set until acknowledged, and entries pending past the
//! visibility horizon are redeliverable to another consumer in the group.

pub mod config;
pub mod store;

pub use config::BusConfig;
pub use store::{
    BusError, BusResult, MemoryStreamStore, PendingEntry, StreamEntry, StreamEntryId, StreamInfo,
    StreamStore, TopicInfo,
};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{FabricError, FabricResult};
use crate::message::BusMessage;

/// Receipt returned by a successful send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendReceipt {
    pub message_id: String,
    pub status: String,
    pub stream_id: String,
    pub timestamp: chrono::DateTime<Utc>,
}

/// Per-id acknowledgment outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckOutcome {
    pub id: String,
    pub acked: bool,
}

/// Queue introspection for one agent inbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatus {
    pub agent_id: String,
    pub queue_depth: usize,
    pub stream_info: StreamInfo,
}

/// The message bus the pipeline dispatches `fabric.message.*` calls to.
///
/// The store handle is shared (reference-counted); the bus itself is cheap
/// to clone.
#[derive(Clone)]
pub struct FabricMessageBus {
    store: Arc<dyn StreamStore>,
    config: BusConfig,
}

fn store_err(err: BusError) -> FabricError {
    FabricError::bus_unavailable(format!("message store unavailable: {err}"))
}

impl FabricMessageBus {
    pub fn new(store: Arc<dyn StreamStore>, config: BusConfig) -> Self {
        Self { store, config }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStreamStore::new()), BusConfig::default())
    }

    fn inbox_key(agent_id: &str) -> String {
        format!("agent:{agent_id}:inbox")
    }

    fn group_for(&self, agent_id: &str, overridden: Option<&str>) -> String {
        overridden
            .map(str::to_string)
            .unwrap_or_else(|| format!("{agent_id}{}", self.config.group_suffix))
    }

    fn consumer_for(&self, agent_id: &str) -> String {
        self.config
            .consumer_name
            .clone()
            .unwrap_or_else(|| format!("{agent_id}_{}", std::process::id()))
    }

    /// Append a message to the recipient's inbox and fan out a lightweight
    /// new-message notification on `agent.{to}.new_message`.
    pub async fn send(&self, mut message: BusMessage) -> FabricResult<SendReceipt> {
        let Some(to_agent) = message.to_agent.clone() else {
            return Err(FabricError::bad_input(
                "message has no recipient; use publish for topics",
            ));
        };

        let payload = serde_json::to_value(&message)
            .map_err(|e| FabricError::internal(format!("message serialization failed: {e}")))?;
        let stream_id = self
            .store
            .append(&Self::inbox_key(&to_agent), payload, self.config.max_stream_len)
            .await
            .map_err(store_err)?;
        message.stream_entry_id = Some(stream_id.to_string());

        // Real-time nudge for subscribers; delivery still goes through the
        // inbox stream.
        let _ = self
            .store
            .publish(
                &format!("agent.{to_agent}.new_message"),
                serde_json::json!({
                    "from": message.from_agent.clone(),
                    "type": message.message_type.clone(),
                    "priority": message.priority,
                    "message_id": message.message_id.clone(),
                }),
            )
            .await;

        debug!(message_id = %message.message_id, to_agent = %to_agent, "message queued");
        Ok(SendReceipt {
            message_id: message.message_id,
            status: "queued".to_string(),
            stream_id: stream_id.to_string(),
            timestamp: message.timestamp,
        })
    }

    /// Read up to `count` messages for `agent_id`, blocking up to `block_ms`
    /// when the inbox has nothing pending. Returned messages carry their
    /// `stream_entry_id` for acknowledgment.
    pub async fn receive(
        &self,
        agent_id: &str,
        count: usize,
        block_ms: u64,
        consumer_group: Option<&str>,
    ) -> FabricResult<Vec<BusMessage>> {
        let stream = Self::inbox_key(agent_id);
        let group = self.group_for(agent_id, consumer_group);
        self.store
            .ensure_group(&stream, &group)
            .await
            .map_err(store_err)?;

        let entries = self
            .store
            .read_group(
                &stream,
                &group,
                &self.consumer_for(agent_id),
                count,
                Duration::from_millis(block_ms),
                self.config.visibility_horizon,
            )
            .await
            .map_err(store_err)?;

        let mut messages = Vec::with_capacity(entries.len());
        for entry in entries {
            match serde_json::from_value::<BusMessage>(entry.payload) {
                Ok(mut message) => {
                    message.stream_entry_id = Some(entry.id.to_string());
                    messages.push(message);
                }
                Err(e) => {
                    // A corrupt entry must not wedge the inbox; drop it from
                    // the pending set and move on.
                    debug!(stream = %stream, entry_id = %entry.id, error = %e, "skipping undecodable entry");
                    let _ = self.store.ack(&stream, &group, entry.id).await;
                }
            }
        }
        Ok(messages)
    }

    /// Acknowledge delivered messages by stream entry id.
    ///
    /// The stream entry id is authoritative; ids that do not parse as entry
    /// ids are reported `acked: false`. Acking an entry that is unknown or
    /// already acknowledged is idempotent success.
    pub async fn acknowledge(
        &self,
        agent_id: &str,
        ids: &[String],
        consumer_group: Option<&str>,
    ) -> FabricResult<Vec<AckOutcome>> {
        let stream = Self::inbox_key(agent_id);
        let group = self.group_for(agent_id, consumer_group);

        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            match StreamEntryId::parse(id) {
                Ok(entry_id) => {
                    self.store
                        .ack(&stream, &group, entry_id)
                        .await
                        .map_err(store_err)?;
                    outcomes.push(AckOutcome {
                        id: id.clone(),
                        acked: true,
                    });
                }
                Err(_) => outcomes.push(AckOutcome {
                    id: id.clone(),
                    acked: false,
                }),
            }
        }
        Ok(outcomes)
    }

    /// Broadcast to all current subscribers of `topic`; not persisted.
    pub async fn publish(
        &self,
        topic: &str,
        data: serde_json::Value,
        from_agent: Option<&str>,
    ) -> FabricResult<usize> {
        let payload = serde_json::json!({
            "data": data,
            "from": from_agent,
            "timestamp": Utc::now(),
            "topic": topic,
        });
        let recipients = self.store.publish(topic, payload).await.map_err(store_err)?;
        debug!(topic = %topic, recipients, "published");
        Ok(recipients)
    }

    pub async fn queue_status(&self, agent_id: &str) -> FabricResult<QueueStatus> {
        let stream = Self::inbox_key(agent_id);
        let queue_depth = self.store.len(&stream).await.map_err(store_err)?;
        let stream_info = self.store.info(&stream).await.map_err(store_err)?;
        Ok(QueueStatus {
            agent_id: agent_id.to_string(),
            queue_depth,
            stream_info,
        })
    }

    /// Delivered-but-unacknowledged entries for an agent's group.
    pub async fn pending(
        &self,
        agent_id: &str,
        consumer_group: Option<&str>,
    ) -> FabricResult<Vec<PendingEntry>> {
        let stream = Self::inbox_key(agent_id);
        let group = self.group_for(agent_id, consumer_group);
        self.store.pending(&stream, &group).await.map_err(store_err)
    }

    pub async fn topics(&self) -> FabricResult<Vec<TopicInfo>> {
        self.store.topics().await.map_err(store_err)
    }

    /// Trim an inbox to `maxlen` entries, returning how many were dropped.
    pub async fn trim(&self, agent_id: &str, maxlen: usize) -> FabricResult<usize> {
        self.store
            .trim(&Self::inbox_key(agent_id), maxlen)
            .await
            .map_err(store_err)
    }
}

#[cfg(test)]
mod tests;
