//! Message Bus: in-process, typed message passing among agents, independent of
//! task assignment. A side-channel — the Dispatcher never routes through it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex, Notify, RwLock};
use tracing::{instrument, warn};

use crate::domain::error::MessageBusError;
use crate::domain::models::agent::AgentId;
use crate::domain::models::event::{EventBody, Subject};
use crate::domain::models::message::{Message, MessageId, MessageKind, Recipient};
use crate::services::event_stream::EventStream;

/// A single agent's bounded FIFO inbox. `Command` messages are never dropped; any
/// other kind is evicted from the front (oldest first) to make room under backpressure.
struct Inbox {
    queue: Mutex<VecDeque<Message>>,
    notify: Notify,
    capacity: usize,
}

impl Inbox {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    /// Returns `true` if an existing message was evicted to make room.
    async fn push(&self, message: Message) -> bool {
        let mut queue = self.queue.lock().await;
        let mut dropped = false;
        if queue.len() >= self.capacity {
            let victim = queue.iter().position(|m| m.kind != MessageKind::Command);
            match victim {
                Some(idx) => {
                    queue.remove(idx);
                    dropped = true;
                }
                // Every queued message is a Command; Commands are never dropped, so the
                // inbox is allowed to exceed its nominal capacity in this degenerate case.
                None => {}
            }
        }
        queue.push_back(message);
        drop(queue);
        self.notify.notify_one();
        dropped
    }

    async fn recv(&self) -> Message {
        loop {
            {
                let mut queue = self.queue.lock().await;
                if let Some(message) = queue.pop_front() {
                    return message;
                }
            }
            self.notify.notified().await;
        }
    }
}

pub struct MessageBus {
    inboxes: RwLock<HashMap<AgentId, Arc<Inbox>>>,
    channels: RwLock<HashMap<String, HashSet<AgentId>>>,
    pending_requests: Mutex<HashMap<MessageId, oneshot::Sender<Message>>>,
    events: Option<Arc<EventStream>>,
    inbox_capacity: usize,
}

impl MessageBus {
    pub fn new(inbox_capacity: usize) -> Self {
        Self {
            inboxes: RwLock::new(HashMap::new()),
            channels: RwLock::new(HashMap::new()),
            pending_requests: Mutex::new(HashMap::new()),
            events: None,
            inbox_capacity,
        }
    }

    pub fn shared(inbox_capacity: usize) -> Arc<Self> {
        Arc::new(Self::new(inbox_capacity))
    }

    #[must_use]
    pub fn with_event_stream(mut self, events: Arc<EventStream>) -> Self {
        self.events = Some(events);
        self
    }

    pub async fn register_agent(&self, agent_id: AgentId) {
        self.inboxes
            .write()
            .await
            .entry(agent_id)
            .or_insert_with(|| Arc::new(Inbox::new(self.inbox_capacity)));
    }

    pub async fn deregister_agent(&self, agent_id: AgentId) {
        self.inboxes.write().await.remove(&agent_id);
        let mut channels = self.channels.write().await;
        for subscribers in channels.values_mut() {
            subscribers.remove(&agent_id);
        }
    }

    pub async fn subscribe(&self, channel: &str, agent_id: AgentId) {
        self.channels
            .write()
            .await
            .entry(channel.to_string())
            .or_default()
            .insert(agent_id);
    }

    pub async fn unsubscribe(&self, channel: &str, agent_id: AgentId) {
        if let Some(subscribers) = self.channels.write().await.get_mut(channel) {
            subscribers.remove(&agent_id);
        }
    }

    /// Blocks until an inbox message is available for `agent_id`.
    pub async fn recv(&self, agent_id: AgentId) -> Option<Message> {
        let inbox = self.inboxes.read().await.get(&agent_id).cloned();
        match inbox {
            Some(inbox) => Some(inbox.recv().await),
            None => None,
        }
    }

    /// Enqueue a message. A `Response` whose `correlation_id` matches an outstanding
    /// `request()` resolves that caller directly instead of entering an inbox.
    #[instrument(skip(self, message), fields(kind = ?message.kind))]
    pub async fn send(&self, message: Message) -> Result<(), MessageBusError> {
        if message.kind == MessageKind::Response {
            if let Some(correlation_id) = message.correlation_id {
                let waiter = self.pending_requests.lock().await.remove(&correlation_id);
                if let Some(waiter) = waiter {
                    let _ = waiter.send(message);
                    return Ok(());
                }
            }
        }

        match &message.recipient {
            Recipient::Agent(agent_id) => self.deliver_to(*agent_id, message).await,
            Recipient::Channel(name) => self.deliver_to_channel(name, message).await,
            Recipient::All => {
                self.deliver_best_effort_to_all(message).await;
                Ok(())
            }
        }
    }

    async fn deliver_to(&self, agent_id: AgentId, message: Message) -> Result<(), MessageBusError> {
        let inbox = self.inboxes.read().await.get(&agent_id).cloned();
        let Some(inbox) = inbox else {
            return Err(MessageBusError::UnknownRecipient);
        };
        if inbox.push(message).await {
            self.warn_message_dropped(agent_id).await;
        }
        Ok(())
    }

    async fn deliver_to_channel(&self, name: &str, message: Message) -> Result<(), MessageBusError> {
        let subscribers = self.channels.read().await.get(name).cloned();
        let Some(subscribers) = subscribers else {
            return Err(MessageBusError::UnknownRecipient);
        };
        // Snapshot the inbox handles before awaiting pushes so a slow/full subscriber
        // never blocks delivery to the others (best-effort fan-out).
        let targets: Vec<(AgentId, Arc<Inbox>)> = {
            let inboxes = self.inboxes.read().await;
            subscribers
                .into_iter()
                .filter_map(|agent_id| inboxes.get(&agent_id).cloned().map(|inbox| (agent_id, inbox)))
                .collect()
        };
        for (agent_id, inbox) in targets {
            if inbox.push(message.clone()).await {
                self.warn_message_dropped(agent_id).await;
            }
        }
        Ok(())
    }

    async fn deliver_best_effort_to_all(&self, message: Message) {
        let inboxes = self.inboxes.read().await;
        for (agent_id, inbox) in inboxes.iter() {
            if inbox.push(message.clone()).await {
                warn!(%agent_id, "inbox overflow on broadcast-to-all delivery");
            }
        }
    }

    async fn warn_message_dropped(&self, agent_id: AgentId) {
        warn!(%agent_id, "dropped oldest non-command message on inbox overflow");
        if let Some(events) = &self.events {
            events
                .emit(
                    Subject::Agent(agent_id),
                    EventBody::SystemAlert {
                        message: format!("message bus dropped a message for agent {agent_id} (inbox full)"),
                    },
                )
                .await;
        }
    }

    /// Send `payload` to `recipient` and await the correlated `Response`, or fail with
    /// `Timeout` if none arrives within `timeout`.
    #[instrument(skip(self, payload))]
    pub async fn request(
        &self,
        sender: AgentId,
        recipient: Recipient,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> Result<Message, MessageBusError> {
        let request = Message::new(sender, recipient, MessageKind::Request, payload);
        let (tx, rx) = oneshot::channel();
        self.pending_requests.lock().await.insert(request.id, tx);

        if let Err(err) = self.send(request.clone()).await {
            self.pending_requests.lock().await.remove(&request.id);
            return Err(err);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            _ => {
                self.pending_requests.lock().await.remove(&request.id);
                Err(MessageBusError::Timeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_point_to_point_in_fifo_order() {
        let bus = MessageBus::new(16);
        let sender = AgentId::new();
        let recipient = AgentId::new();
        bus.register_agent(recipient).await;

        for i in 0..3 {
            bus.send(Message::new(
                sender,
                Recipient::Agent(recipient),
                MessageKind::Event,
                serde_json::json!({"i": i}),
            ))
            .await
            .unwrap();
        }

        for i in 0..3 {
            let message = bus.recv(recipient).await.unwrap();
            assert_eq!(message.payload["i"], i);
        }
    }

    #[tokio::test]
    async fn send_to_unregistered_agent_fails_unknown_recipient() {
        let bus = MessageBus::new(16);
        let err = bus
            .send(Message::new(
                AgentId::new(),
                Recipient::Agent(AgentId::new()),
                MessageKind::Event,
                serde_json::Value::Null,
            ))
            .await
            .unwrap_err();
        assert_eq!(err, MessageBusError::UnknownRecipient);
    }

    #[tokio::test]
    async fn overflow_drops_oldest_non_command_message() {
        let bus = MessageBus::new(2);
        let sender = AgentId::new();
        let recipient = AgentId::new();
        bus.register_agent(recipient).await;

        for i in 0..3 {
            bus.send(Message::new(
                sender,
                Recipient::Agent(recipient),
                MessageKind::Event,
                serde_json::json!({"i": i}),
            ))
            .await
            .unwrap();
        }

        let first = bus.recv(recipient).await.unwrap();
        assert_eq!(first.payload["i"], 1, "oldest message (i=0) should have been dropped");
    }

    #[tokio::test]
    async fn commands_are_never_dropped_under_overflow() {
        let bus = MessageBus::new(1);
        let sender = AgentId::new();
        let recipient = AgentId::new();
        bus.register_agent(recipient).await;

        bus.send(Message::new(
            sender,
            Recipient::Agent(recipient),
            MessageKind::Command,
            serde_json::json!("halt"),
        ))
        .await
        .unwrap();
        bus.send(Message::new(
            sender,
            Recipient::Agent(recipient),
            MessageKind::Event,
            serde_json::json!("ignored"),
        ))
        .await
        .unwrap();

        let first = bus.recv(recipient).await.unwrap();
        assert_eq!(first.kind, MessageKind::Command);
    }

    #[tokio::test]
    async fn request_resolves_from_a_matching_response() {
        let bus = Arc::new(MessageBus::new(16));
        let requester = AgentId::new();
        let responder = AgentId::new();
        bus.register_agent(responder).await;

        let bus_clone = Arc::clone(&bus);
        let responder_task = tokio::spawn(async move {
            let request = bus_clone.recv(responder).await.unwrap();
            let response = Message::response_to(&request, responder, serde_json::json!({"ok": true}));
            bus_clone.send(response).await.unwrap();
        });

        let response = bus
            .request(
                requester,
                Recipient::Agent(responder),
                serde_json::json!({"q": 1}),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(response.payload["ok"], true);
        responder_task.await.unwrap();
    }

    #[tokio::test]
    async fn request_times_out_without_a_response() {
        let bus = MessageBus::new(16);
        let responder = AgentId::new();
        bus.register_agent(responder).await;

        let err = bus
            .request(
                AgentId::new(),
                Recipient::Agent(responder),
                serde_json::Value::Null,
                Duration::from_millis(20),
            )
            .await
            .unwrap_err();
        assert_eq!(err, MessageBusError::Timeout);
    }

    #[tokio::test]
    async fn broadcast_channel_reaches_every_subscriber() {
        let bus = MessageBus::new(16);
        let a = AgentId::new();
        let b = AgentId::new();
        bus.register_agent(a).await;
        bus.register_agent(b).await;
        bus.subscribe("status", a).await;
        bus.subscribe("status", b).await;

        bus.send(Message::new(
            AgentId::new(),
            Recipient::Channel("status".into()),
            MessageKind::Event,
            serde_json::json!("ping"),
        ))
        .await
        .unwrap();

        assert_eq!(bus.recv(a).await.unwrap().payload, "ping");
        assert_eq!(bus.recv(b).await.unwrap().payload, "ping");
    }

    #[tokio::test]
    async fn send_to_unknown_channel_fails_unknown_recipient() {
        let bus = MessageBus::new(16);
        let err = bus
            .send(Message::new(
                AgentId::new(),
                Recipient::Channel("never-subscribed".into()),
                MessageKind::Event,
                serde_json::Value::Null,
            ))
            .await
            .unwrap_err();
        assert_eq!(err, MessageBusError::UnknownRecipient);
    }
}
