//! Agent-to-agent messages carried by the bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for MessagePriority {
    fn default() -> Self {
        MessagePriority::Normal
    }
}

impl MessagePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessagePriority::Low => "low",
            MessagePriority::Normal => "normal",
            MessagePriority::High => "high",
            MessagePriority::Critical => "critical",
        }
    }
}

/// Standard message format for agent-to-agent communication.
///
/// `stream_entry_id` is assigned by the stream store on send and echoed back
/// on receive; it is the authoritative handle for acknowledgment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    pub message_id: String,
    pub from_agent: String,
    /// `None` for topic publishes.
    pub to_agent: Option<String>,
    pub message_type: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: MessagePriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_entry_id: Option<String>,
}

impl BusMessage {
    pub fn new(
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        message_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            message_id: format!("msg:{}", Uuid::new_v4()),
            from_agent: from_agent.into(),
            to_agent: Some(to_agent.into()),
            message_type: message_type.into(),
            payload,
            priority: MessagePriority::Normal,
            reply_to: None,
            correlation_id: Some(Uuid::new_v4().to_string()),
            timestamp: Utc::now(),
            stream_entry_id: None,
        }
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}
