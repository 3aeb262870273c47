//! The ordered-stream store backing the message bus.
//!
//! The store contract mirrors what the bus needs from a Redis-Streams-style
//! backend: append-only per-stream entries with monotonic ids, consumer
//! groups with a pending set and idle-based reclaim, and a fire-and-forget
//! pub/sub channel. [`MemoryStreamStore`] is the in-process implementation;
//! a network-backed store slots in behind the same trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, Notify, RwLock};

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BusError {
    #[error("Store error: {0}")]
    Store(String),
    #[error("Consumer group not found: {0}")]
    GroupNotFound(String),
    #[error("Invalid stream entry id: {0}")]
    InvalidEntryId(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type BusResult<T> = Result<T, BusError>;

// ─────────────────────────────────────────────────────────────────────────────
// Entry ids
// ─────────────────────────────────────────────────────────────────────────────

/// Monotonic per-stream entry id, `"<unix_ms>-<seq>"` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StreamEntryId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamEntryId {
    pub fn parse(s: &str) -> BusResult<Self> {
        let (ms, seq) = s
            .split_once('-')
            .ok_or_else(|| BusError::InvalidEntryId(s.to_string()))?;
        let ms = ms
            .parse()
            .map_err(|_| BusError::InvalidEntryId(s.to_string()))?;
        let seq = seq
            .parse()
            .map_err(|_| BusError::InvalidEntryId(s.to_string()))?;
        Ok(Self { ms, seq })
    }
}

impl std::fmt::Display for StreamEntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

/// One stored entry handed back by a group read.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub id: StreamEntryId,
    pub payload: serde_json::Value,
}

/// A delivered-but-unacknowledged entry, for introspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingEntry {
    pub entry_id: String,
    pub consumer: String,
    pub idle_ms: u64,
    pub delivery_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupInfo {
    pub name: String,
    pub pending: usize,
    pub last_delivered_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamInfo {
    pub length: usize,
    pub first_entry_id: Option<String>,
    pub last_entry_id: Option<String>,
    pub groups: Vec<GroupInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicInfo {
    pub topic: String,
    pub subscribers: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Store contract
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait StreamStore: Send + Sync {
    /// Append an entry, trimming the stream to `maxlen`. Returns the
    /// assigned entry id.
    async fn append(
        &self,
        stream: &str,
        payload: serde_json::Value,
        maxlen: usize,
    ) -> BusResult<StreamEntryId>;

    /// Create the consumer group if it does not exist (and the stream with
    /// it). Existing groups are left untouched.
    async fn ensure_group(&self, stream: &str, group: &str) -> BusResult<()>;

    /// Read up to `count` entries for `consumer` in `group`.
    ///
    /// Entries pending longer than `min_idle` are reclaimed first (the
    /// redelivery primitive), then undelivered entries in id order. Blocks
    /// up to `block` when nothing is available. Returned entries are
    /// age-ordered and become pending for this consumer.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
        min_idle: Duration,
    ) -> BusResult<Vec<StreamEntry>>;

    /// Acknowledge a delivered entry. Returns whether it was pending;
    /// acking an unknown or already-acked id is not an error.
    async fn ack(&self, stream: &str, group: &str, id: StreamEntryId) -> BusResult<bool>;

    /// Delivered-but-unacknowledged entries for a group.
    async fn pending(&self, stream: &str, group: &str) -> BusResult<Vec<PendingEntry>>;

    async fn len(&self, stream: &str) -> BusResult<usize>;

    async fn info(&self, stream: &str) -> BusResult<StreamInfo>;

    async fn trim(&self, stream: &str, maxlen: usize) -> BusResult<usize>;

    /// Broadcast to current subscribers of `topic`; nothing is persisted.
    /// Returns the number of subscribers that received the payload.
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> BusResult<usize>;

    /// Known topics with live subscriber counts.
    async fn topics(&self) -> BusResult<Vec<TopicInfo>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory implementation
// ─────────────────────────────────────────────────────────────────────────────

struct PendingState {
    consumer: String,
    delivered_at: Instant,
    delivery_count: u32,
}

#[derive(Default)]
struct GroupState {
    last_delivered: StreamEntryId,
    pending: BTreeMap<StreamEntryId, PendingState>,
}

struct StreamState {
    entries: VecDeque<StreamEntry>,
    last_id: StreamEntryId,
    groups: HashMap<String, GroupState>,
    notify: Arc<Notify>,
}

impl Default for StreamState {
    fn default() -> Self {
        Self {
            entries: VecDeque::new(),
            last_id: StreamEntryId::default(),
            groups: HashMap::new(),
            notify: Arc::new(Notify::new()),
        }
    }
}

impl StreamState {
    fn next_id(&mut self) -> StreamEntryId {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let id = if now_ms > self.last_id.ms {
            StreamEntryId { ms: now_ms, seq: 0 }
        } else {
            StreamEntryId {
                ms: self.last_id.ms,
                seq: self.last_id.seq + 1,
            }
        };
        self.last_id = id;
        id
    }
}

/// In-process [`StreamStore`] built on tokio primitives.
///
/// Blocking group reads poll in short slices so an append landing between
/// the lock release and the wait registration is picked up on the next
/// slice rather than lost until the deadline.
pub struct MemoryStreamStore {
    streams: RwLock<HashMap<String, StreamState>>,
    topics: RwLock<HashMap<String, broadcast::Sender<serde_json::Value>>>,
}

const WAIT_SLICE: Duration = Duration::from_millis(100);
const TOPIC_CAPACITY: usize = 256;

impl MemoryStreamStore {
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            topics: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe to a topic. Used by in-process observers and the topic
    /// listing; network fronts consume the bus through `receive` instead.
    pub async fn subscribe(&self, topic: &str) -> broadcast::Receiver<serde_json::Value> {
        let mut topics = self.topics.write().await;
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe()
    }

    fn collect_batch(
        stream: &mut StreamState,
        group_name: &str,
        consumer: &str,
        count: usize,
        min_idle: Duration,
    ) -> BusResult<Vec<StreamEntry>> {
        let now = Instant::now();
        let mut picked: Vec<StreamEntryId> = Vec::new();

        {
            let group = stream
                .groups
                .get_mut(group_name)
                .ok_or_else(|| BusError::GroupNotFound(group_name.to_string()))?;

            // Reclaim entries whose delivery went stale.
            for (id, p) in group.pending.iter_mut() {
                if picked.len() >= count {
                    break;
                }
                if now.duration_since(p.delivered_at) >= min_idle {
                    p.delivered_at = now;
                    p.delivery_count += 1;
                    p.consumer = consumer.to_string();
                    picked.push(*id);
                }
            }
        }

        // Undelivered entries past the group cursor, in id order.
        let cursor = stream.groups[group_name].last_delivered;
        let fresh: Vec<StreamEntryId> = stream
            .entries
            .iter()
            .map(|e| e.id)
            .filter(|id| *id > cursor)
            .take(count.saturating_sub(picked.len()))
            .collect();

        {
            let group = stream.groups.get_mut(group_name).expect("group exists");
            for id in &fresh {
                group.pending.insert(
                    *id,
                    PendingState {
                        consumer: consumer.to_string(),
                        delivered_at: now,
                        delivery_count: 1,
                    },
                );
                group.last_delivered = *id;
            }
        }

        picked.extend(fresh);
        picked.sort();

        Ok(picked
            .into_iter()
            .filter_map(|id| stream.entries.iter().find(|e| e.id == id).cloned())
            .collect())
    }
}

impl Default for MemoryStreamStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamStore for MemoryStreamStore {
    async fn append(
        &self,
        stream: &str,
        payload: serde_json::Value,
        maxlen: usize,
    ) -> BusResult<StreamEntryId> {
        let mut streams = self.streams.write().await;
        let state = streams.entry(stream.to_string()).or_default();
        let id = state.next_id();
        state.entries.push_back(StreamEntry { id, payload });
        while state.entries.len() > maxlen {
            state.entries.pop_front();
        }
        state.notify.notify_waiters();
        Ok(id)
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> BusResult<()> {
        let mut streams = self.streams.write().await;
        let state = streams.entry(stream.to_string()).or_default();
        state.groups.entry(group.to_string()).or_default();
        Ok(())
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
        min_idle: Duration,
    ) -> BusResult<Vec<StreamEntry>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let deadline = Instant::now() + block;
        loop {
            let notify = {
                let mut streams = self.streams.write().await;
                let state = streams.entry(stream.to_string()).or_default();
                state.groups.entry(group.to_string()).or_default();
                let batch = Self::collect_batch(state, group, consumer, count, min_idle)?;
                if !batch.is_empty() {
                    return Ok(batch);
                }
                state.notify.clone()
            };

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let slice = (deadline - now).min(WAIT_SLICE);
            tokio::select! {
                _ = notify.notified() => {}
                _ = tokio::time::sleep(slice) => {}
            }
        }
    }

    async fn ack(&self, stream: &str, group: &str, id: StreamEntryId) -> BusResult<bool> {
        let mut streams = self.streams.write().await;
        let Some(state) = streams.get_mut(stream) else {
            return Ok(false);
        };
        let Some(group) = state.groups.get_mut(group) else {
            return Ok(false);
        };
        Ok(group.pending.remove(&id).is_some())
    }

    async fn pending(&self, stream: &str, group: &str) -> BusResult<Vec<PendingEntry>> {
        let streams = self.streams.read().await;
        let now = Instant::now();
        let Some(state) = streams.get(stream) else {
            return Ok(Vec::new());
        };
        let Some(group) = state.groups.get(group) else {
            return Ok(Vec::new());
        };
        Ok(group
            .pending
            .iter()
            .map(|(id, p)| PendingEntry {
                entry_id: id.to_string(),
                consumer: p.consumer.clone(),
                idle_ms: now.duration_since(p.delivered_at).as_millis() as u64,
                delivery_count: p.delivery_count,
            })
            .collect())
    }

    async fn len(&self, stream: &str) -> BusResult<usize> {
        let streams = self.streams.read().await;
        Ok(streams.get(stream).map(|s| s.entries.len()).unwrap_or(0))
    }

    async fn info(&self, stream: &str) -> BusResult<StreamInfo> {
        let streams = self.streams.read().await;
        let Some(state) = streams.get(stream) else {
            return Ok(StreamInfo {
                length: 0,
                first_entry_id: None,
                last_entry_id: None,
                groups: Vec::new(),
            });
        };
        Ok(StreamInfo {
            length: state.entries.len(),
            first_entry_id: state.entries.front().map(|e| e.id.to_string()),
            last_entry_id: state.entries.back().map(|e| e.id.to_string()),
            groups: state
                .groups
                .iter()
                .map(|(name, g)| GroupInfo {
                    name: name.clone(),
                    pending: g.pending.len(),
                    last_delivered_id: g.last_delivered.to_string(),
                })
                .collect(),
        })
    }

    async fn trim(&self, stream: &str, maxlen: usize) -> BusResult<usize> {
        let mut streams = self.streams.write().await;
        let Some(state) = streams.get_mut(stream) else {
            return Ok(0);
        };
        let mut removed = 0;
        while state.entries.len() > maxlen {
            state.entries.pop_front();
            removed += 1;
        }
        Ok(removed)
    }

    async fn publish(&self, topic: &str, payload: serde_json::Value) -> BusResult<usize> {
        let mut topics = self.topics.write().await;
        let sender = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0);
        // A send with no receivers is not a failure; there are simply zero
        // recipients.
        Ok(sender.send(payload).unwrap_or(0))
    }

    async fn topics(&self) -> BusResult<Vec<TopicInfo>> {
        let topics = self.topics.read().await;
        let mut out: Vec<TopicInfo> = topics
            .iter()
            .map(|(topic, sender)| TopicInfo {
                topic: topic.clone(),
                subscribers: sender.receiver_count(),
            })
            .collect();
        out.sort_by(|a, b| a.topic.cmp(&b.topic));
        Ok(out)
    }
}
