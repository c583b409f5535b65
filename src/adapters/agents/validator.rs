//! `validator` specialization: stands in for an agent that checks another agent's
//! output rather than producing new work.

use async_trait::async_trait;
use serde_json::json;

use crate::domain::models::task::{FailureReason, Task, TaskOutcome};
use crate::domain::ports::AgentHandle;

/// Declares the `"validator"` capability. Treats an explicit `"valid": false` in the
/// payload as an agent-caused exception so the retry/demotion path can be exercised.
pub struct ValidatorAgent;

#[async_trait]
impl AgentHandle for ValidatorAgent {
    async fn process_task(&self, task: &Task) -> TaskOutcome {
        if task.payload.get("valid") == Some(&serde_json::Value::Bool(false)) {
            return TaskOutcome::Failure {
                reason: FailureReason::AgentException("validation failed".to_string()),
            };
        }
        TaskOutcome::Success {
            result: json!({ "specialization": "validator", "valid": true }),
        }
    }
}
