//! Task entity: the unit of work routed through the coordinator.
//!
//! A task moves through a small state machine enforced by [`TaskStatus::can_transition_to`].
//! The queue and dispatcher are the only components permitted to mutate a task's status;
//! everything else observes it through [`crate::services::task_queue_service::TaskQueueService`].

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable opaque identifier for a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a task. Transitions follow the DAG documented on [`TaskStatus::valid_transitions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Ready,
    Assigned,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal states retain their record for a retention window before eviction.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Valid successor states from the current one. Anything not listed here is rejected.
    pub const fn valid_transitions(self) -> &'static [Self] {
        match self {
            Self::Pending => &[Self::Ready, Self::Cancelled],
            Self::Ready => &[Self::Assigned, Self::Cancelled, Self::Failed],
            Self::Assigned => &[Self::Running, Self::Ready, Self::Cancelled, Self::Failed],
            Self::Running => &[Self::Succeeded, Self::Failed, Self::Cancelled, Self::Ready],
            Self::Succeeded | Self::Failed | Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        self.valid_transitions().contains(&next)
    }
}

/// Why a task ended in `Failed`, or why a retry was scheduled. Mirrors the execution-error
/// kinds of the taxonomy; preserved on the task record for `query()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "detail")]
pub enum FailureReason {
    AgentException(String),
    AgentStopped,
    Timeout,
    ToolFailed(String),
    ProviderFailed(String),
    DependencyFailed(TaskId),
}

impl FailureReason {
    /// Agent-caused failures and timeouts are retryable; dependency failures and
    /// cooperative cancellation never are.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AgentException(_) | Self::AgentStopped | Self::Timeout
        )
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AgentException(msg) => write!(f, "agent raised an exception: {msg}"),
            Self::AgentStopped => write!(f, "agent stopped while task was in flight"),
            Self::Timeout => write!(f, "task exceeded its deadline"),
            Self::ToolFailed(msg) => write!(f, "tool invocation failed: {msg}"),
            Self::ProviderFailed(msg) => write!(f, "provider call failed: {msg}"),
            Self::DependencyFailed(id) => write!(f, "dependency {id} did not succeed"),
        }
    }
}

/// The outcome of a `process_task` call, returned by an agent specialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum TaskOutcome {
    Success { result: serde_json::Value },
    Failure { reason: FailureReason },
}

/// Caller-supplied description of work to submit. Validated and turned into a [`Task`]
/// by `Coordinator::submit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub required_capabilities: HashSet<String>,
    #[serde(default)]
    pub dependencies: HashSet<TaskId>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    pub deadline: Option<DateTime<Utc>>,
}

const fn default_max_retries() -> u32 {
    0
}

impl TaskSpec {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: serde_json::Value::Null,
            priority: 0,
            required_capabilities: HashSet::new(),
            dependencies: HashSet::new(),
            max_retries: default_max_retries(),
            deadline: None,
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_required_capabilities(mut self, caps: impl IntoIterator<Item = String>) -> Self {
        self.required_capabilities = caps.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = TaskId>) -> Self {
        self.dependencies = deps.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// A task as tracked by the Task Queue and Dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub kind: String,
    pub payload: serde_json::Value,
    pub priority: i64,
    pub required_capabilities: HashSet<String>,
    pub dependencies: HashSet<TaskId>,
    pub max_retries: u32,
    pub deadline: Option<DateTime<Utc>>,
    pub submitted_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub last_assigned_agent: Option<Uuid>,
    pub result: Option<serde_json::Value>,
    pub failure: Option<FailureReason>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn from_spec(spec: TaskSpec) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            kind: spec.kind,
            payload: spec.payload,
            priority: spec.priority,
            required_capabilities: spec.required_capabilities,
            dependencies: spec.dependencies,
            max_retries: spec.max_retries,
            deadline: spec.deadline,
            submitted_at: now,
            status: TaskStatus::Pending,
            retry_count: 0,
            last_assigned_agent: None,
            result: None,
            failure: None,
            updated_at: now,
        }
    }

    /// `priority + retry_count`, per the retry demotion rule —
    /// a retried task loses ground to fresh submissions at the same base priority.
    pub fn effective_priority(&self) -> i64 {
        self.priority + i64::from(self.retry_count)
    }

    pub fn deadline_or_default(&self, default_deadline: Duration) -> DateTime<Utc> {
        self.deadline.unwrap_or(self.submitted_at + default_deadline)
    }

    /// Attempts the transition, mutating `status`/`updated_at` and returning an error
    /// describing the rejected edge instead of panicking.
    pub fn transition_to(&mut self, next: TaskStatus) -> Result<(), String> {
        if !self.status.can_transition_to(next) {
            return Err(format!(
                "invalid task transition from {:?} to {next:?}",
                self.status
            ));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn mark_succeeded(&mut self, result: serde_json::Value) -> Result<(), String> {
        self.transition_to(TaskStatus::Succeeded)?;
        self.result = Some(result);
        Ok(())
    }

    pub fn mark_failed(&mut self, reason: FailureReason) -> Result<(), String> {
        self.transition_to(TaskStatus::Failed)?;
        self.failure = Some(reason);
        Ok(())
    }

    pub fn mark_cancelled(&mut self) -> Result<(), String> {
        self.transition_to(TaskStatus::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_to_ready_is_valid() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Ready));
    }

    #[test]
    fn terminal_states_accept_no_transitions() {
        assert!(TaskStatus::Succeeded.valid_transitions().is_empty());
        assert!(TaskStatus::Failed.valid_transitions().is_empty());
        assert!(TaskStatus::Cancelled.valid_transitions().is_empty());
    }

    #[test]
    fn running_can_retry_back_to_ready() {
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Ready));
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let mut task = Task::from_spec(TaskSpec::new("echo"));
        assert!(task.transition_to(TaskStatus::Succeeded).is_err());
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn effective_priority_is_demoted_by_retry_count() {
        let mut task = Task::from_spec(TaskSpec::new("echo").with_priority(5));
        task.retry_count = 2;
        assert_eq!(task.effective_priority(), 7);
    }

    #[test]
    fn mark_succeeded_populates_result_exactly_once() {
        let mut task = Task::from_spec(TaskSpec::new("echo"));
        task.transition_to(TaskStatus::Ready).unwrap();
        task.transition_to(TaskStatus::Assigned).unwrap();
        task.transition_to(TaskStatus::Running).unwrap();
        task.mark_succeeded(serde_json::json!({"ok": true})).unwrap();
        assert_eq!(task.status, TaskStatus::Succeeded);
        assert!(task.result.is_some());
    }

    #[test]
    fn failure_reason_retryability_matches_taxonomy() {
        assert!(FailureReason::AgentException("boom".into()).is_retryable());
        assert!(FailureReason::Timeout.is_retryable());
        assert!(!FailureReason::DependencyFailed(TaskId::new()).is_retryable());
    }
}
