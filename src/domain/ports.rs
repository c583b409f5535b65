//! Ports the core depends on but does not implement: the agent plug-in interface
//! and the event ring buffer's storage abstraction.

use async_trait::async_trait;

use super::models::event::{Event, SequenceNumber};
use super::models::message::Message;
use super::models::task::{Task, TaskOutcome};

/// An agent implementation: capability set, optional lifecycle hooks, and the single
/// method the Dispatcher invokes to do work. Specializations (research, code,
/// task-manager, monitor, validator) are opaque behind this trait — the core
/// distinguishes them only by their declared capabilities, never by type.
#[async_trait]
pub trait AgentHandle: Send + Sync {
    /// Execute the task and report a value-typed outcome; implementations may panic
    /// or return an `Err` internally, but the runtime always observes `TaskOutcome`.
    async fn process_task(&self, task: &Task) -> TaskOutcome;

    /// Optional hook for `Request`/`Event` kinds delivered outside task assignment.
    async fn handle_message(&self, _message: &Message) {}

    /// Called once before the first task is accepted.
    async fn init(&self) {}

    /// Called once during `stop()`, after the current task (if any) has drained.
    async fn teardown(&self) {}
}

/// Append-only storage backing the Event Stream's ring buffer, allowing reconnecting
/// subscribers to catch up from a sequence number. The default in-process adapter
/// (`crate::services::event_store::InMemoryEventStore`) keeps only the last N events;
/// a durable adapter is an external concern — the core keeps no persisted state of its own.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append(&self, event: Event);

    /// Events with sequence number strictly greater than `since`, in ascending order.
    async fn since(&self, since: SequenceNumber) -> Vec<Event>;

    /// Oldest sequence number still retained; used to detect whether a reconnecting
    /// subscriber's `since` has fallen outside the window and needs a `GapNotice`.
    async fn oldest_retained(&self) -> Option<SequenceNumber>;

    async fn latest_sequence(&self) -> SequenceNumber;
}
