//! `monitor` specialization: watches for `SystemAlert`/status-change messages in
//! addition to handling its own assigned tasks.

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use crate::domain::models::message::{Message, MessageKind};
use crate::domain::models::task::{Task, TaskOutcome};
use crate::domain::ports::AgentHandle;

/// Declares the `"monitor"` capability.
pub struct MonitorAgent;

#[async_trait]
impl AgentHandle for MonitorAgent {
    async fn process_task(&self, _task: &Task) -> TaskOutcome {
        TaskOutcome::Success {
            result: json!({ "specialization": "monitor", "observed": true }),
        }
    }

    async fn handle_message(&self, message: &Message) {
        if matches!(message.kind, MessageKind::Event) {
            warn!(message_id = %message.id, "monitor observed event message");
        }
    }
}
