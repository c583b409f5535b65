//! Event entity published by the Event Stream: an immutable, sequence-numbered
//! record of a state change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::agent::AgentId;
use super::task::{FailureReason, TaskId};

/// Monotonically increasing sequence number assigned by the Event Stream at publish time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    pub const fn zero() -> Self {
        Self(0)
    }

    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which entity an event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subject {
    Task(TaskId),
    Agent(AgentId),
    System,
}

/// Closed set of event kinds. Two immediate-flush kinds (`SystemAlert`,
/// terminal task kinds) bypass batching entirely; the rest share 200ms windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "body")]
pub enum EventBody {
    TaskSubmitted,
    TaskReady,
    TaskAssigned { agent_id: AgentId },
    TaskStarted,
    TaskCompleted { result: serde_json::Value },
    TaskFailed { reason: FailureReason },
    TaskRetryScheduled { delay_ms: u64, retry_count: u32 },
    TaskCancelled,
    AgentRegistered,
    AgentStatusChanged { load: f64 },
    AgentMetricsUpdate { load: f64, reliability: f64 },
    SystemAlert { message: String },
    Heartbeat { load: f64, reliability: f64 },
}

impl EventBody {
    /// {TaskCompleted, TaskFailed, TaskCancelled, SystemAlert} bypass the 200ms batching
    /// window and flush immediately.
    pub const fn is_immediate_flush(&self) -> bool {
        matches!(
            self,
            Self::TaskCompleted { .. }
                | Self::TaskFailed { .. }
                | Self::TaskCancelled
                | Self::SystemAlert { .. }
        )
    }

    /// Short, stable tag used as the collapsing key alongside `subject` within a batch
    /// window (last-wins-per-kind+subject; no collapsing across kinds).
    pub const fn kind_tag(&self) -> &'static str {
        match self {
            Self::TaskSubmitted => "task_submitted",
            Self::TaskReady => "task_ready",
            Self::TaskAssigned { .. } => "task_assigned",
            Self::TaskStarted => "task_started",
            Self::TaskCompleted { .. } => "task_completed",
            Self::TaskFailed { .. } => "task_failed",
            Self::TaskRetryScheduled { .. } => "task_retry_scheduled",
            Self::TaskCancelled => "task_cancelled",
            Self::AgentRegistered => "agent_registered",
            Self::AgentStatusChanged { .. } => "agent_status_changed",
            Self::AgentMetricsUpdate { .. } => "agent_metrics_update",
            Self::SystemAlert { .. } => "system_alert",
            Self::Heartbeat { .. } => "heartbeat",
        }
    }
}

/// An immutable, sequence-numbered fact published by the Event Stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub sequence: SequenceNumber,
    pub subject: Subject,
    pub body: EventBody,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Constructed with a placeholder sequence number; the Event Stream assigns the
    /// real one at publish time via `fetch_add` on its counter.
    pub fn new(subject: Subject, body: EventBody) -> Self {
        Self {
            sequence: SequenceNumber::zero(),
            subject,
            body,
            timestamp: Utc::now(),
        }
    }
}

/// Reported to a subscriber whose lag exceeded the ring buffer's retained history;
/// the gap between `last_seen` and `resumed_at` was permanently lost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapNotice {
    pub last_seen: SequenceNumber,
    pub resumed_at: SequenceNumber,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_increase_monotonically() {
        let a = SequenceNumber::zero();
        let b = a.next();
        assert!(b > a);
    }

    #[test]
    fn immediate_flush_kinds_match_spec() {
        assert!(EventBody::TaskCompleted { result: serde_json::Value::Null }.is_immediate_flush());
        assert!(EventBody::TaskFailed { reason: FailureReason::Timeout }.is_immediate_flush());
        assert!(EventBody::TaskCancelled.is_immediate_flush());
        assert!(!EventBody::TaskReady.is_immediate_flush());
        assert!(!EventBody::Heartbeat { load: 0.0, reliability: 1.0 }.is_immediate_flush());
    }
}
