//! Agent entity: a long-lived worker registered with the coordinator.
//!
//! Distinct from the Agent Runtime (the cooperative worker that *hosts* an agent, see
//! `crate::services::agent_runtime`), this module holds the data the Registry tracks about
//! each instance: identity, capabilities, load, and reliability.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable opaque identifier for an [`Agent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub Uuid);

impl AgentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Agent lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Created,
    Idle,
    Busy,
    Waiting,
    Error,
    /// Heartbeat lapsed past `agent_unreachable_multiplier` intervals; equivalent to
    /// Offline for dispatch purposes but reversible if heartbeats resume.
    Unreachable,
    /// Terminal: the agent instance was stopped and will never be reused.
    Offline,
}

impl AgentStatus {
    /// Offline is the only terminal status for an agent instance.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Offline)
    }

    /// Whether the Registry may offer this agent as a dispatch candidate, independent
    /// of load — `candidates()` still filters on `load < 1.0` on top of this.
    pub const fn is_dispatchable(self) -> bool {
        matches!(self, Self::Idle | Self::Busy)
    }
}

/// A registered agent instance as tracked by the Agent Registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub role: String,
    pub capabilities: HashSet<String>,
    pub status: AgentStatus,
    pub current_task_id: Option<Uuid>,
    /// Fraction of concurrent-task slots in use, in `[0.0, 1.0]`.
    pub load: f64,
    pub max_concurrent: u32,
    /// EWMA of success rate on agent-caused outcomes, in `[0.0, 1.0]`. See
    /// `crate::services::agent_runtime` for the update rule (α=0.2).
    pub reliability: f64,
    pub last_heartbeat: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Count of consecutive cancel commands the agent never acknowledged within the
    /// grace period; three in a row demotes the agent to `Error`.
    pub consecutive_cancel_non_acks: u32,
    /// Timestamp of the last `assign_task`; the Registry's candidate sort uses this as
    /// its round-robin tie-break (oldest last assignment first).
    pub last_assigned_at: Option<DateTime<Utc>>,
}

impl Agent {
    pub fn new(name: impl Into<String>, role: impl Into<String>, capabilities: HashSet<String>, max_concurrent: u32) -> Self {
        let now = Utc::now();
        Self {
            id: AgentId::new(),
            name: name.into(),
            role: role.into(),
            capabilities,
            status: AgentStatus::Created,
            current_task_id: None,
            load: 0.0,
            max_concurrent: max_concurrent.max(1),
            reliability: 1.0,
            last_heartbeat: now,
            created_at: now,
            consecutive_cancel_non_acks: 0,
            last_assigned_at: None,
        }
    }

    pub fn has_capabilities(&self, required: &HashSet<String>) -> bool {
        required.is_subset(&self.capabilities)
    }

    /// `status=Busy iff current_task_id ≠ null OR load>0` — the invariant is kept true
    /// by routing every load/current-task mutation through these helpers rather than
    /// setting `status` directly.
    fn sync_busy_status(&mut self) {
        let should_be_busy = self.current_task_id.is_some() || self.load > 0.0;
        if should_be_busy {
            if matches!(self.status, AgentStatus::Idle | AgentStatus::Waiting) {
                self.status = AgentStatus::Busy;
            }
        } else if self.status == AgentStatus::Busy {
            self.status = AgentStatus::Idle;
        }
    }

    pub fn start(&mut self) {
        if self.status == AgentStatus::Created {
            self.status = AgentStatus::Idle;
        }
    }

    pub fn assign_task(&mut self, task_id: Uuid) {
        self.current_task_id = Some(task_id);
        self.load = (self.load + 1.0 / f64::from(self.max_concurrent)).min(1.0);
        self.last_assigned_at = Some(Utc::now());
        self.sync_busy_status();
    }

    pub fn release_task(&mut self) {
        self.current_task_id = None;
        self.load = (self.load - 1.0 / f64::from(self.max_concurrent)).max(0.0);
        self.sync_busy_status();
    }

    pub fn record_heartbeat(&mut self) {
        self.last_heartbeat = Utc::now();
        self.consecutive_cancel_non_acks = 0;
        if self.status == AgentStatus::Unreachable {
            self.status = if self.load > 0.0 { AgentStatus::Busy } else { AgentStatus::Idle };
        }
    }

    pub fn mark_unreachable(&mut self) {
        if !self.status.is_terminal() {
            self.status = AgentStatus::Unreachable;
        }
    }

    pub fn mark_error(&mut self) {
        if !self.status.is_terminal() {
            self.status = AgentStatus::Error;
        }
    }

    pub fn mark_offline(&mut self) {
        self.status = AgentStatus::Offline;
    }

    /// EWMA update with α=0.2: success → 1, failure → 0; timeout/cancel must not call this.
    pub fn record_outcome(&mut self, success: bool) {
        const ALPHA: f64 = 0.2;
        let sample = if success { 1.0 } else { 0.0 };
        self.reliability = ALPHA * sample + (1.0 - ALPHA) * self.reliability;
    }
}
