//! Domain error types for the swarm coordinator
//!
//! Each enum represents one branch of the error taxonomy: input errors surfaced
//! synchronously to callers, transient/execution errors handled internally by the
//! Dispatcher, and infrastructure errors reported as `SystemAlert` events.

use thiserror::Error;
use uuid::Uuid;

/// Errors returned synchronously to the caller of the Coordinator Facade.
/// No state change occurs when one of these is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("invalid task: {0}")]
    InvalidTask(String),

    #[error("task has a circular dependency")]
    CyclicDependency,

    #[error("unknown agent: {0}")]
    UnknownAgent(Uuid),

    #[error("task queue is full (max_pending_tasks reached)")]
    QueueFull,

    #[error("unknown task: {0}")]
    UnknownTask(Uuid),
}

/// Errors handled internally by the Dispatcher. Never escapes to the caller;
/// translated into a `TaskFailed` event (or, for the non-failure kinds, absorbed silently).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Not a failure: the task is parked until a capable agent becomes available.
    #[error("no capable agent currently available")]
    NoCapableAgent,

    /// Another dispatcher iteration won the race; retry with the next candidate.
    #[error("assignment race lost to a concurrent dispatch")]
    AssignmentRaceLost,

    #[error("agent raised an exception: {0}")]
    AgentException(String),

    #[error("agent was stopped while a task was in flight")]
    AgentStopped,

    #[error("task exceeded its deadline")]
    Timeout,

    #[error("dependency {0} did not succeed")]
    DependencyFailed(Uuid),
}

impl DispatchError {
    /// Agent-caused failures and timeouts are retryable.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NoCapableAgent
                | Self::AssignmentRaceLost
                | Self::AgentException(_)
                | Self::AgentStopped
                | Self::Timeout
        )
    }

    /// Dependency failures are never retried: `DependencyFailed` and `Cancelled` are both permanent.
    pub const fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

/// Errors surfaced by the Message Bus.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageBusError {
    #[error("unknown recipient")]
    UnknownRecipient,

    #[error("request timed out waiting for a response")]
    Timeout,

    #[error("message channel closed")]
    ChannelClosed,
}

/// Errors related to configuration loading and validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(String),

    #[error("invalid max_pending_tasks: {0}, must be greater than zero")]
    InvalidMaxPendingTasks(usize),

    #[error("invalid agent_heartbeat_interval_seconds: {0}, must be greater than zero")]
    InvalidHeartbeatInterval(u64),

    #[error(
        "invalid retry backoff configuration: retry_base_delay_seconds ({0}) must be less than retry_max_delay_seconds ({1})"
    )]
    InvalidRetryBackoff(u64, u64),

    #[error("invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Infrastructure-level alerts that surface to subscribers as `SystemAlert` events
/// rather than through `CoordinatorError`/`DispatchError`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InfrastructureAlert {
    #[error("event subscriber fell behind the ring buffer and lost {lost} events")]
    EventSubscriberLagging { lost: u64 },

    #[error("agent {0} is unreachable")]
    AgentUnreachable(Uuid),

    #[error("event ring buffer overflow")]
    RingBufferOverflow,
}

/// Crate-wide result alias used at the Coordinator Facade boundary.
pub type CoordinatorResult<T> = std::result::Result<T, CoordinatorError>;
