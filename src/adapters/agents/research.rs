//! `research` specialization: answers tasks that only need to read and summarize.

use async_trait::async_trait;
use serde_json::json;

use crate::domain::models::task::{Task, TaskOutcome};
use crate::domain::ports::AgentHandle;

/// Declares the `"research"` capability. Echoes the task payload back as a finding.
pub struct ResearchAgent;

#[async_trait]
impl AgentHandle for ResearchAgent {
    async fn process_task(&self, task: &Task) -> TaskOutcome {
        TaskOutcome::Success {
            result: json!({ "specialization": "research", "finding": task.payload.clone() }),
        }
    }
}
