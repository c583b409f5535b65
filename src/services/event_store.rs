//! In-memory ring-buffer `EventStore`, backing the Event Stream's late-subscriber
//! catch-up path. Holds at most `capacity` events; older ones are evicted and
//! are only recoverable via a `GapNotice` to whoever asked for them.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::models::event::{Event, SequenceNumber};
use crate::domain::ports::EventStore;

/// Single-writer, many-lock-free-readers-in-spirit ring buffer, capacity-bounded to
/// match `event_ring_capacity`; evicts from the front on overflow.
pub struct RingBufferEventStore {
    capacity: usize,
    events: RwLock<VecDeque<Event>>,
}

impl RingBufferEventStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: RwLock::new(VecDeque::with_capacity(capacity.min(4096))),
        }
    }

    pub fn shared(capacity: usize) -> Arc<Self> {
        Arc::new(Self::new(capacity))
    }
}

#[async_trait]
impl EventStore for RingBufferEventStore {
    async fn append(&self, event: Event) {
        let mut events = self.events.write().await;
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    async fn since(&self, since: SequenceNumber) -> Vec<Event> {
        let events = self.events.read().await;
        events
            .iter()
            .filter(|event| event.sequence > since)
            .cloned()
            .collect()
    }

    async fn oldest_retained(&self) -> Option<SequenceNumber> {
        let events = self.events.read().await;
        events.front().map(|event| event.sequence)
    }

    async fn latest_sequence(&self) -> SequenceNumber {
        let events = self.events.read().await;
        events
            .back()
            .map_or(SequenceNumber::zero(), |event| event.sequence)
    }
}
