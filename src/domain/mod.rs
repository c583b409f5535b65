//! Domain layer for the swarm coordinator
//!
//! Contains core business logic, domain models, and the ports that the services layer
//! implements concrete adapters against.

pub mod error;
pub mod models;
pub mod ports;

pub use error::{
    ConfigError, CoordinatorError, CoordinatorResult, DispatchError, InfrastructureAlert,
    MessageBusError,
};
pub use ports::{AgentHandle, EventStore};
