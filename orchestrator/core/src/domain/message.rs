// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Message Domain Types
//!
//! Value objects exchanged over the [`MessageBus`](crate::infrastructure::message_bus::MessageBus).
//!
//! A [`Message`] is handed to subscribers as `Arc<Message>`, so every
//! subscriber of one publish observes the very same id, content, source,
//! priority and timestamp. Only the routing fields (`topic`, `message_type`,
//! `target`, `correlation_id`) are assigned by the bus while the message is
//! being dispatched.

use crate::domain::agent::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque ordered key → value payload.
pub type Content = serde_json::Map<String, serde_json::Value>;

/// Build a [`Content`] map from a `serde_json::json!({...})` object literal.
///
/// Non-object values yield an empty map.
pub fn content(value: serde_json::Value) -> Content {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Content::new(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token pairing a request with its eventual response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Event,
    Command,
    Direct,
    Request,
    Response,
}

/// Ordered priority: `Low < Normal < High < Urgent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessagePriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    message_type: MessageType,
    source: AgentId,
    target: Option<AgentId>,
    topic: String,
    content: Content,
    priority: MessagePriority,
    timestamp: DateTime<Utc>,
    correlation_id: Option<CorrelationId>,
}

impl Message {
    pub fn new(message_type: MessageType, source: impl Into<AgentId>, content: Content) -> Self {
        Self {
            id: MessageId::new(),
            message_type,
            source: source.into(),
            target: None,
            topic: String::new(),
            content,
            priority: MessagePriority::Normal,
            timestamp: Utc::now(),
            correlation_id: None,
        }
    }

    pub fn event(source: impl Into<AgentId>, content: Content) -> Self {
        Self::new(MessageType::Event, source, content)
    }

    pub fn command(source: impl Into<AgentId>, content: Content) -> Self {
        Self::new(MessageType::Command, source, content)
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub(crate) fn routed_to(mut self, topic: &str) -> Self {
        self.topic = topic.to_string();
        self
    }

    pub(crate) fn addressed_to(mut self, message_type: MessageType, target: &AgentId) -> Self {
        self.message_type = message_type;
        self.target = Some(target.clone());
        self
    }

    pub(crate) fn correlated(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn source(&self) -> &AgentId {
        &self.source
    }

    pub fn target(&self) -> Option<&AgentId> {
        self.target.as_ref()
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.content.get(key)
    }

    pub fn priority(&self) -> MessagePriority {
        self.priority
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.correlation_id
    }

    /// True for correlated requests that expect a `send_response`.
    pub fn expects_response(&self) -> bool {
        self.message_type == MessageType::Request && self.correlation_id.is_some()
    }
}

/// Outcome of a `request_response` round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub correlation_id: CorrelationId,
    pub success: bool,
    pub payload: Content,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timed_out: bool,
    /// A responder saw the request and answered it, successfully or not.
    #[serde(default)]
    pub answered: bool,
    pub received_at: DateTime<Utc>,
}

impl Response {
    pub fn success(correlation_id: CorrelationId, payload: Content) -> Self {
        Self {
            correlation_id,
            success: true,
            payload,
            error: None,
            timed_out: false,
            answered: true,
            received_at: Utc::now(),
        }
    }

    pub fn failure(correlation_id: CorrelationId, error: impl Into<String>) -> Self {
        Self {
            correlation_id,
            success: false,
            payload: Content::new(),
            error: Some(error.into()),
            timed_out: false,
            answered: false,
            received_at: Utc::now(),
        }
    }

    /// The responder answered, but with an error.
    pub fn rejected(correlation_id: CorrelationId, error: impl Into<String>) -> Self {
        Self {
            answered: true,
            ..Self::failure(correlation_id, error)
        }
    }

    pub fn timeout(correlation_id: CorrelationId, after: std::time::Duration) -> Self {
        Self {
            timed_out: true,
            ..Self::failure(
                correlation_id,
                format!("request timed out after {}ms", after.as_millis()),
            )
        }
    }
}
