//! Application services implementing the swarm coordinator's core components.

pub mod agent_registry;
pub mod agent_runtime;
pub mod coordinator;
pub mod dependency_resolver;
pub mod dispatcher;
pub mod event_store;
pub mod event_stream;
pub mod message_bus;
pub mod priority_calculator;
pub mod task_queue_service;

pub use agent_registry::AgentRegistry;
pub use agent_runtime::{AgentRuntime, AgentRuntimeConfig, RuntimeReport};
pub use coordinator::{AgentRegistration, Coordinator};
pub use dependency_resolver::DependencyResolver;
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use event_store::RingBufferEventStore;
pub use event_stream::{EventBatch, EventFilter, EventStream, EventStreamConfig};
pub use message_bus::MessageBus;
pub use priority_calculator::PriorityCalculator;
pub use task_queue_service::{RetryPolicy, TaskQueueService};
