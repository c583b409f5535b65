//! Event Stream: publishes state-change events to subscribers, batching
//! high-frequency kinds so a burst of `AgentMetricsUpdate`/`Heartbeat` events does not
//! overwhelm a slow subscriber.
//!
//! Two windows apply: a 200ms window for status/metrics classes, and an
//! immediate-flush class for {`TaskCompleted`, `TaskFailed`, `TaskCancelled`,
//! `SystemAlert`}. Within a window, events of the same kind+subject collapse to the
//! latest value; a batch also flushes early once it reaches 100 events. A ring buffer
//! of the last N events (`crate::services::event_store::RingBufferEventStore`) lets
//! reconnecting subscribers resume from their last acknowledged sequence; gaps surface
//! as a `GapNotice`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use tokio::sync::{broadcast, Mutex};
use tracing::{instrument, warn};

use crate::domain::models::event::{Event, EventBody, GapNotice, SequenceNumber, Subject};
use crate::domain::ports::EventStore;

/// Subscriber-side filter on kind and/or subject. `None` in either field means "match
/// everything" for that dimension.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub kinds: Option<Vec<&'static str>>,
    pub subject: Option<Subject>,
}

impl EventFilter {
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.body.kind_tag()) {
                return false;
            }
        }
        if let Some(subject) = &self.subject {
            if &event.subject != subject {
                return false;
            }
        }
        true
    }
}

/// An ordered run of events delivered to a subscriber in one receive. Sequence numbers
/// stay dense across batches even though they may be sparse (collapsed) within one.
#[derive(Debug, Clone)]
pub struct EventBatch {
    pub events: Vec<Event>,
}

#[derive(Debug, Clone)]
pub struct EventStreamConfig {
    pub batch_window: StdDuration,
    pub max_batch_size: usize,
    pub ring_capacity: usize,
}

impl Default for EventStreamConfig {
    fn default() -> Self {
        Self {
            batch_window: StdDuration::from_millis(200),
            max_batch_size: 100,
            ring_capacity: 10_000,
        }
    }
}

/// Collapsing key for the pending batch: same kind+subject within one window replaces
/// the prior entry in place (last-wins), preserving its original position in the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CollapseKey {
    kind: &'static str,
    subject: SubjectKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SubjectKey {
    Task(uuid::Uuid),
    Agent(uuid::Uuid),
    System,
}

impl From<Subject> for SubjectKey {
    fn from(subject: Subject) -> Self {
        match subject {
            Subject::Task(id) => Self::Task(id.0),
            Subject::Agent(id) => Self::Agent(id.0),
            Subject::System => Self::System,
        }
    }
}

struct PendingBatch {
    order: Vec<Event>,
    index: HashMap<CollapseKey, usize>,
}

impl PendingBatch {
    fn new() -> Self {
        Self {
            order: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn push(&mut self, event: Event) {
        let key = CollapseKey {
            kind: event.body.kind_tag(),
            subject: event.subject.into(),
        };
        if let Some(&idx) = self.index.get(&key) {
            self.order[idx] = event;
        } else {
            self.index.insert(key, self.order.len());
            self.order.push(event);
        }
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn drain(&mut self) -> Vec<Event> {
        self.index.clear();
        std::mem::take(&mut self.order)
    }
}

/// The Event Stream component. A single writer (this struct's async methods, driven by
/// one cooperative worker) assigns sequence numbers and flushes batches; many readers
/// subscribe via `broadcast` receivers.
pub struct EventStream {
    sender: broadcast::Sender<Arc<EventBatch>>,
    sequence: AtomicU64,
    store: Arc<dyn EventStore>,
    pending: Mutex<PendingBatch>,
    config: EventStreamConfig,
}

impl EventStream {
    pub fn new(config: EventStreamConfig, store: Arc<dyn EventStore>) -> Self {
        let (sender, _) = broadcast::channel(4096);
        Self {
            sender,
            sequence: AtomicU64::new(0),
            store,
            pending: Mutex::new(PendingBatch::new()),
            config,
        }
    }

    pub fn shared(config: EventStreamConfig, store: Arc<dyn EventStore>) -> Arc<Self> {
        Arc::new(Self::new(config, store))
    }

    /// Publish a fact. Immediate-flush kinds bypass the batch window entirely
    /// and are delivered as a single-event batch. Everything else joins the pending
    /// batch, collapsing with any prior event of the same kind+subject this window.
    #[instrument(skip(self, body), fields(subject = ?subject))]
    pub async fn emit(&self, subject: Subject, body: EventBody) {
        let sequence = SequenceNumber(self.sequence.fetch_add(1, Ordering::SeqCst) + 1);
        let mut event = Event::new(subject, body);
        event.sequence = sequence;

        self.store.append(event.clone()).await;

        if event.body.is_immediate_flush() {
            // Flush whatever is still pending for this window first, or a subscriber
            // would see this immediate event before the batched ones that causally
            // precede it (e.g. TaskAssigned/TaskStarted still sitting in `pending`
            // when the task completes milliseconds later).
            self.flush().await;
            self.publish_batch(vec![event]);
            return;
        }

        let should_flush = {
            let mut pending = self.pending.lock().await;
            pending.push(event);
            pending.len() >= self.config.max_batch_size
        };
        if should_flush {
            self.flush().await;
        }
    }

    /// Flush whatever is pending, regardless of window state. Called by the window
    /// timer (see `spawn_batcher`) and opportunistically when a batch fills up.
    pub async fn flush(&self) {
        let events = {
            let mut pending = self.pending.lock().await;
            if pending.is_empty() {
                return;
            }
            pending.drain()
        };
        self.publish_batch(events);
    }

    fn publish_batch(&self, events: Vec<Event>) {
        if events.is_empty() {
            return;
        }
        // A broadcast channel with no receivers returns an error; that is a no-op,
        // not a failure (there is simply nothing downstream to observe this batch yet).
        let _ = self.sender.send(Arc::new(EventBatch { events }));
    }

    /// Spawns the background worker that flushes the pending batch on `batch_window`
    /// boundaries. Returns the join handle so the Coordinator can abort it on `stop()`.
    pub fn spawn_batcher(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let stream = Arc::clone(self);
        let window = self.config.batch_window;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(window);
            loop {
                ticker.tick().await;
                stream.flush().await;
            }
        })
    }

    pub fn current_sequence(&self) -> SequenceNumber {
        SequenceNumber(self.sequence.load(Ordering::SeqCst))
    }

    /// Subscribe with a filter. `resume_from` replays ring-buffer history first
    /// (surfacing a `GapNotice` if it fell outside the retained window), then the
    /// returned receiver carries live batches.
    pub async fn subscribe(
        &self,
        filter: EventFilter,
        resume_from: Option<SequenceNumber>,
    ) -> (Vec<Event>, Option<GapNotice>, broadcast::Receiver<Arc<EventBatch>>) {
        let receiver = self.sender.subscribe();
        let Some(since) = resume_from else {
            return (Vec::new(), None, receiver);
        };

        let gap = match self.store.oldest_retained().await {
            Some(oldest) if oldest > since.next() => Some(GapNotice {
                last_seen: since,
                resumed_at: oldest,
            }),
            _ => None,
        };
        let replay: Vec<Event> = self
            .store
            .since(since)
            .await
            .into_iter()
            .filter(|event| filter.matches(event))
            .collect();
        if gap.is_some() {
            warn!(?since, "subscriber resumed with a sequence gap");
        }
        (replay, gap, receiver)
    }
}
