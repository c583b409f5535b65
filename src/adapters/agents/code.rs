//! `code` specialization: stands in for a code-generation/edit agent.

use async_trait::async_trait;
use serde_json::json;

use crate::domain::models::task::{FailureReason, Task, TaskOutcome};
use crate::domain::ports::AgentHandle;

/// Declares the `"code"` capability. Fails tasks whose payload is not an object,
/// mimicking a tool-invocation failure on malformed instructions.
pub struct CodeAgent;

#[async_trait]
impl AgentHandle for CodeAgent {
    async fn process_task(&self, task: &Task) -> TaskOutcome {
        if !task.payload.is_object() && !task.payload.is_null() {
            return TaskOutcome::Failure {
                reason: FailureReason::ToolFailed("code task payload must be an object".to_string()),
            };
        }
        TaskOutcome::Success {
            result: json!({ "specialization": "code", "patch": "diff --git a/stub b/stub" }),
        }
    }
}
