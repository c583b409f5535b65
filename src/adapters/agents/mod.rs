//! Agent specializations: concrete `AgentHandle` implementations the core never
//! distinguishes by type, only by declared capability. These are stubs used for
//! scenario testing and demo wiring in `main.rs`; a real deployment would swap them
//! for specializations backed by an LLM substrate.

pub mod code;
pub mod monitor;
pub mod research;
pub mod task_manager;
pub mod validator;

pub use code::CodeAgent;
pub use monitor::MonitorAgent;
pub use research::ResearchAgent;
pub use task_manager::TaskManagerAgent;
pub use validator::ValidatorAgent;
