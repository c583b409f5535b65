//! Infrastructure layer: adapters wiring the domain/service layers to the outside
//! world — configuration loading and structured logging.

pub mod config;
pub mod logging;
