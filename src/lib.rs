//! SwarmBot — a swarm coordinator: a task queue with dependency/priority ordering,
//! an agent registry and runtime supervision layer, and a dispatcher that assigns
//! ready work to capable agents under deadline and cancellation guarantees.
//!
//! The public surface is the Coordinator Facade (`services::Coordinator`); callers
//! never touch the Message Bus, Event Stream, Task Queue, Agent Registry, or
//! Dispatcher directly.

pub mod adapters;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use services::{AgentRegistration, Coordinator};
