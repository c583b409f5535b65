//! Adapters implementing ports the core depends on but does not itself define.
//!
//! Each sub-module plugs into a domain trait (`AgentHandle`) from the outside,
//! the way `adapters::plugins` does for ingestion/egress ports.

pub mod agents;
