//! `task-manager` specialization: stands in for an agent that breaks work down or
//! re-prioritizes, rather than producing a final artifact.

use async_trait::async_trait;
use serde_json::json;

use crate::domain::models::task::{Task, TaskOutcome};
use crate::domain::ports::AgentHandle;

/// Declares the `"task-manager"` capability.
pub struct TaskManagerAgent;

#[async_trait]
impl AgentHandle for TaskManagerAgent {
    async fn process_task(&self, task: &Task) -> TaskOutcome {
        TaskOutcome::Success {
            result: json!({ "specialization": "task-manager", "subtasks_planned": 0, "kind": task.kind }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::task::TaskSpec;

    #[tokio::test]
    async fn process_task_succeeds() {
        let agent = TaskManagerAgent;
        let task = Task::from_spec(TaskSpec::new("plan"));
        assert!(matches!(agent.process_task(&task).await, TaskOutcome::Success { .. }));
    }
}
