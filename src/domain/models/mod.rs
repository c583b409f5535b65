//! Domain models
//!
//! Pure domain entities with business logic and validation rules.
//! These models are framework-agnostic and contain no infrastructure concerns.

pub mod agent;
pub mod config;
pub mod event;
pub mod message;
pub mod task;

pub use agent::{Agent, AgentId, AgentStatus};
pub use config::{Config, CoordinatorConfig, LogFormat, LoggingConfig, RotationPolicy};
pub use event::{Event, EventBody, GapNotice, SequenceNumber, Subject};
pub use message::{Message, MessageId, MessageKind, Recipient};
pub use task::{FailureReason, Task, TaskId, TaskOutcome, TaskSpec, TaskStatus};
