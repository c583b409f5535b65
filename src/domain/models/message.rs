//! Message entity exchanged over the Message Bus.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::agent::AgentId;

/// Stable opaque identifier for a [`Message`].
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

/// Where a message is delivered: a specific agent, a named broadcast channel, or every
/// subscriber in-process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recipient {
    Agent(AgentId),
    Channel(String),
    All,
}

/// Message kind. `Command`s are never dropped under inbox backpressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Request,
    Response,
    Event,
    Command,
}

/// A point-to-point or broadcast message passed between agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender: AgentId,
    pub recipient: Recipient,
    pub kind: MessageKind,
    /// On a `Response`, echoes the `id` of the `Request` it answers.
    pub correlation_id: Option<MessageId>,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub ttl: Option<Duration>,
}

impl Message {
    pub fn new(sender: AgentId, recipient: Recipient, kind: MessageKind, payload: serde_json::Value) -> Self {
        Self {
            id: MessageId::new(),
            sender,
            recipient,
            kind,
            correlation_id: None,
            payload,
            timestamp: Utc::now(),
            ttl: None,
        }
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: MessageId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn is_expired(&self) -> bool {
        match self.ttl {
            Some(ttl) => Utc::now() > self.timestamp + ttl,
            None => false,
        }
    }

    pub fn response_to(request: &Message, sender: AgentId, payload: serde_json::Value) -> Self {
        let recipient = Recipient::Agent(request.sender);
        Self::new(sender, recipient, MessageKind::Response, payload)
            .with_correlation_id(request.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_carries_correlation_id_of_request() {
        let requester = AgentId::new();
        let responder = AgentId::new();
        let request = Message::new(
            requester,
            Recipient::Agent(responder),
            MessageKind::Request,
            serde_json::json!({"q": 1}),
        );
        let response = Message::response_to(&request, responder, serde_json::json!({"a": 2}));
        assert_eq!(response.correlation_id, Some(request.id));
        assert_eq!(response.recipient, Recipient::Agent(requester));
    }

    #[test]
    fn ttl_expiry_is_detected() {
        let mut message = Message::new(
            AgentId::new(),
            Recipient::All,
            MessageKind::Event,
            serde_json::Value::Null,
        );
        message.timestamp = Utc::now() - Duration::seconds(10);
        message.ttl = Some(Duration::seconds(1));
        assert!(message.is_expired());
    }
}
