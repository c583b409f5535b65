//! Agent Registry: the single writer of `Agent` records. The Dispatcher and
//! Coordinator Facade read through this API; nothing mutates an `Agent` directly.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::instrument;

use crate::domain::error::CoordinatorError;
use crate::domain::models::agent::{Agent, AgentId, AgentStatus};

pub struct AgentRegistry {
    agents: RwLock<HashMap<AgentId, Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Inserts the record in `Created` status; `AgentRuntime::start()` is responsible
    /// for the `Created` → `Idle` transition, not registration itself.
    #[instrument(skip(self, agent), fields(agent_id = %agent.id))]
    pub async fn register(&self, agent: Agent) -> AgentId {
        let id = agent.id;
        self.agents.write().await.insert(id, agent);
        id
    }

    pub async fn deregister(&self, agent_id: AgentId) -> Option<Agent> {
        let mut agents = self.agents.write().await;
        if let Some(agent) = agents.get_mut(&agent_id) {
            agent.mark_offline();
        }
        agents.remove(&agent_id)
    }

    pub async fn lookup(&self, agent_id: AgentId) -> Result<Agent, CoordinatorError> {
        self.agents
            .read()
            .await
            .get(&agent_id)
            .cloned()
            .ok_or(CoordinatorError::UnknownAgent(agent_id.0))
    }

    /// Agents whose status is dispatchable, `load < 1.0`, and whose capabilities cover
    /// `required`, ordered by lowest load, then highest reliability, then oldest
    /// last-assignment (round-robin across ties). The sort is stable and deterministic.
    pub async fn candidates(&self, required: &HashSet<String>) -> Vec<Agent> {
        let agents = self.agents.read().await;
        let mut candidates: Vec<Agent> = agents
            .values()
            .filter(|agent| {
                agent.status.is_dispatchable() && agent.load < 1.0 && agent.has_capabilities(required)
            })
            .cloned()
            .collect();
        candidates.sort_by(|a, b| {
            a.load
                .partial_cmp(&b.load)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.reliability.partial_cmp(&a.reliability).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| a.last_assigned_at.cmp(&b.last_assigned_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        candidates
    }

    pub async fn mutate<F, R>(&self, agent_id: AgentId, f: F) -> Result<R, CoordinatorError>
    where
        F: FnOnce(&mut Agent) -> R,
    {
        let mut agents = self.agents.write().await;
        let agent = agents
            .get_mut(&agent_id)
            .ok_or(CoordinatorError::UnknownAgent(agent_id.0))?;
        Ok(f(agent))
    }

    pub async fn mark_unreachable_if_stale(&self, heartbeat_timeout: chrono::Duration) -> Vec<AgentId> {
        let mut agents = self.agents.write().await;
        let now = chrono::Utc::now();
        let mut newly_unreachable = Vec::new();
        for agent in agents.values_mut() {
            if agent.status.is_terminal() || agent.status == AgentStatus::Unreachable {
                continue;
            }
            if now - agent.last_heartbeat > heartbeat_timeout {
                agent.mark_unreachable();
                newly_unreachable.push(agent.id);
            }
        }
        newly_unreachable
    }

    pub async fn len(&self) -> usize {
        self.agents.read().await.len()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent_with(name: &str, load: f64, reliability: f64) -> Agent {
        let mut agent = Agent::new(name, "worker", HashSet::from(["code".to_string()]), 1);
        agent.start();
        agent.load = load;
        agent.reliability = reliability;
        agent
    }

    #[tokio::test]
    async fn candidates_sort_by_lowest_load_then_highest_reliability() {
        let registry = AgentRegistry::new();
        registry.register(agent_with("busy", 0.5, 0.9)).await;
        registry.register(agent_with("idle-low-rel", 0.0, 0.5)).await;
        registry.register(agent_with("idle-high-rel", 0.0, 0.9)).await;

        let required = HashSet::from(["code".to_string()]);
        let candidates = registry.candidates(&required).await;
        assert_eq!(candidates[0].name, "idle-high-rel");
        assert_eq!(candidates[1].name, "idle-low-rel");
        assert_eq!(candidates[2].name, "busy");
    }

    #[tokio::test]
    async fn candidates_excludes_fully_loaded_or_incapable_agents() {
        let registry = AgentRegistry::new();
        let mut full = agent_with("full", 1.0, 1.0);
        full.current_task_id = Some(uuid::Uuid::new_v4());
        registry.register(full).await;
        registry.register(agent_with("capable", 0.2, 0.8)).await;

        let required = HashSet::from(["code".to_string()]);
        let candidates = registry.candidates(&required).await;
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].name, "capable");
    }

    #[tokio::test]
    async fn lookup_unknown_agent_fails() {
        let registry = AgentRegistry::new();
        let err = registry.lookup(AgentId::new()).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::UnknownAgent(_)));
    }

    #[tokio::test]
    async fn stale_heartbeat_marks_agent_unreachable() {
        let registry = AgentRegistry::new();
        let mut agent = agent_with("stale", 0.0, 1.0);
        agent.last_heartbeat = chrono::Utc::now() - chrono::Duration::seconds(100);
        let id = agent.id;
        registry.register(agent).await;

        let newly_unreachable = registry.mark_unreachable_if_stale(chrono::Duration::seconds(15)).await;
        assert_eq!(newly_unreachable, vec![id]);
        assert_eq!(registry.lookup(id).await.unwrap().status, AgentStatus::Unreachable);
    }
}
