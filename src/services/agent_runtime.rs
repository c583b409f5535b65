//! Agent Runtime: one cooperative worker per registered agent, hosting a
//! `AgentHandle` plug-in. Owns nothing durable — all status is delegated to the
//! `Agent` record in the Registry, mutated only through its API.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{instrument, warn};

use crate::domain::error::DispatchError;
use crate::domain::models::agent::{AgentId, AgentStatus};
use crate::domain::models::event::{EventBody, Subject};
use crate::domain::models::message::MessageKind;
use crate::domain::models::task::{FailureReason, Task, TaskId, TaskOutcome};
use crate::domain::ports::AgentHandle;
use crate::services::agent_registry::AgentRegistry;
use crate::services::event_stream::EventStream;
use crate::services::message_bus::MessageBus;

/// What the Dispatcher learns once a `process_task` invocation finishes. Delivered
/// asynchronously since `assign` returns as soon as the task has been accepted.
#[derive(Debug, Clone)]
pub enum RuntimeReport {
    Succeeded { task_id: TaskId, result: serde_json::Value },
    Failed { task_id: TaskId, reason: FailureReason },
}

pub struct AgentRuntimeConfig {
    pub heartbeat_interval: Duration,
    pub stop_grace_period: Duration,
}

impl Default for AgentRuntimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            stop_grace_period: Duration::from_secs(30),
        }
    }
}

pub struct AgentRuntime {
    agent_id: AgentId,
    handle: Arc<dyn AgentHandle>,
    registry: Arc<AgentRegistry>,
    events: Arc<EventStream>,
    message_bus: Arc<MessageBus>,
    reports: mpsc::Sender<RuntimeReport>,
    config: AgentRuntimeConfig,
    stopping: AtomicBool,
}

impl AgentRuntime {
    pub fn new(
        agent_id: AgentId,
        handle: Arc<dyn AgentHandle>,
        registry: Arc<AgentRegistry>,
        events: Arc<EventStream>,
        message_bus: Arc<MessageBus>,
        reports: mpsc::Sender<RuntimeReport>,
        config: AgentRuntimeConfig,
    ) -> Self {
        Self {
            agent_id,
            handle,
            registry,
            events,
            message_bus,
            reports,
            config,
            stopping: AtomicBool::new(false),
        }
    }

    pub fn shared(
        agent_id: AgentId,
        handle: Arc<dyn AgentHandle>,
        registry: Arc<AgentRegistry>,
        events: Arc<EventStream>,
        message_bus: Arc<MessageBus>,
        reports: mpsc::Sender<RuntimeReport>,
        config: AgentRuntimeConfig,
    ) -> Arc<Self> {
        Arc::new(Self::new(agent_id, handle, registry, events, message_bus, reports, config))
    }

    /// `Created` → `Idle`; spawns the inbox consumer and heartbeat emitter.
    #[instrument(skip(self), fields(agent_id = %self.agent_id))]
    pub async fn start(self: &Arc<Self>) -> (JoinHandle<()>, JoinHandle<()>) {
        self.handle.init().await;
        let _ = self.registry.mutate(self.agent_id, |agent| agent.start()).await;
        self.message_bus.register_agent(self.agent_id).await;
        self.events.emit(Subject::Agent(self.agent_id), EventBody::AgentRegistered).await;

        let heartbeat = tokio::spawn(Arc::clone(self).heartbeat_loop());
        let inbox = tokio::spawn(Arc::clone(self).inbox_loop());
        (heartbeat, inbox)
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        loop {
            ticker.tick().await;
            if self.stopping.load(Ordering::SeqCst) {
                return;
            }
            let Ok((old_status, agent)) = self.registry.mutate(self.agent_id, |agent| {
                let old_status = agent.status;
                agent.record_heartbeat();
                (old_status, agent.clone())
            }).await else {
                return;
            };
            if old_status != agent.status {
                self.events.emit(Subject::Agent(self.agent_id), EventBody::AgentStatusChanged { load: agent.load }).await;
            }
            self.events
                .emit(
                    Subject::Agent(self.agent_id),
                    EventBody::Heartbeat { load: agent.load, reliability: agent.reliability },
                )
                .await;
        }
    }

    async fn inbox_loop(self: Arc<Self>) {
        loop {
            if self.stopping.load(Ordering::SeqCst) {
                return;
            }
            let Some(message) = self.message_bus.recv(self.agent_id).await else {
                return;
            };
            if message.kind == MessageKind::Command {
                continue;
            }
            self.handle.handle_message(&message).await;
        }
    }

    /// Precondition: status Idle, or Busy with spare capacity, and the task's
    /// required capabilities covered. On acceptance the invocation runs on its own
    /// task so `assign` returns immediately and higher `max_concurrent` agents can
    /// accept further work while this one is in flight.
    ///
    /// Split into `try_accept`/`start_execution` so the Dispatcher can record
    /// `TaskAssigned` in the queue between the two — the registry reservation has to
    /// happen before that (a failed reservation means trying the next candidate), but
    /// `TaskStarted` must not be published before `TaskAssigned`.
    #[instrument(skip(self, task), fields(task_id = %task.id, agent_id = %self.agent_id))]
    pub async fn assign(self: &Arc<Self>, task: Task) -> Result<(), DispatchError> {
        self.try_accept(&task).await?;
        self.start_execution(task).await;
        Ok(())
    }

    /// Reserves the agent's capacity for `task` if it is idle (or busy with spare
    /// capacity) and covers its required capabilities. Does not emit any event or
    /// start execution — call `start_execution` once the caller has recorded the
    /// assignment.
    pub async fn try_accept(&self, task: &Task) -> Result<(), DispatchError> {
        let required = task.required_capabilities.clone();
        let task_id = task.id;
        let accepted = self
            .registry
            .mutate(self.agent_id, move |agent| {
                let acceptable = matches!(agent.status, AgentStatus::Idle)
                    || (agent.status == AgentStatus::Busy && agent.load < 1.0);
                if acceptable && agent.has_capabilities(&required) {
                    let old_status = agent.status;
                    agent.assign_task(task_id.0);
                    Some((old_status, agent.status, agent.load))
                } else {
                    None
                }
            })
            .await
            .map_err(|_| DispatchError::AgentStopped)?;

        let Some((old_status, new_status, load)) = accepted else {
            return Err(DispatchError::AssignmentRaceLost);
        };
        if old_status != new_status {
            self.events.emit(Subject::Agent(self.agent_id), EventBody::AgentStatusChanged { load }).await;
        }
        Ok(())
    }

    /// Emits `TaskStarted` and spawns the `process_task` invocation. Only call after
    /// `try_accept` has succeeded for this task.
    pub async fn start_execution(self: &Arc<Self>, task: Task) {
        self.events.emit(Subject::Task(task.id), EventBody::TaskStarted).await;
        self.spawn_execution(task);
    }

    fn spawn_execution(self: &Arc<Self>, task: Task) {
        let runtime = Arc::clone(self);
        tokio::spawn(async move {
            let task_id = task.id;
            let invocation = tokio::spawn({
                let handle = Arc::clone(&runtime.handle);
                let task = task.clone();
                async move { handle.process_task(&task).await }
            });

            let outcome = match invocation.await {
                Ok(outcome) => outcome,
                Err(join_error) => {
                    warn!(%task_id, %join_error, "agent panicked while processing task");
                    if let Ok((old_status, new_status, load)) = runtime
                        .registry
                        .mutate(runtime.agent_id, |agent| {
                            let old_status = agent.status;
                            agent.mark_error();
                            (old_status, agent.status, agent.load)
                        })
                        .await
                    {
                        if old_status != new_status {
                            runtime.events.emit(Subject::Agent(runtime.agent_id), EventBody::AgentStatusChanged { load }).await;
                        }
                    }
                    TaskOutcome::Failure {
                        reason: FailureReason::AgentException(join_error.to_string()),
                    }
                }
            };

            let success = matches!(outcome, TaskOutcome::Success { .. });
            if let Ok((old_status, new_status, load, reliability)) = runtime
                .registry
                .mutate(runtime.agent_id, |agent| {
                    let old_status = agent.status;
                    agent.release_task();
                    agent.record_outcome(success);
                    (old_status, agent.status, agent.load, agent.reliability)
                })
                .await
            {
                if old_status != new_status {
                    runtime.events.emit(Subject::Agent(runtime.agent_id), EventBody::AgentStatusChanged { load }).await;
                }
                runtime.events.emit(Subject::Agent(runtime.agent_id), EventBody::AgentMetricsUpdate { load, reliability }).await;
            }

            // The Task Queue is the sole emitter of terminal task events (`mark_succeeded`/
            // `mark_failed` publish `TaskCompleted`/`TaskFailed`); this only reports the
            // outcome back for the queue to record.
            match outcome {
                TaskOutcome::Success { result } => {
                    let _ = runtime.reports.send(RuntimeReport::Succeeded { task_id, result }).await;
                }
                TaskOutcome::Failure { reason } => {
                    let _ = runtime.reports.send(RuntimeReport::Failed { task_id, reason }).await;
                }
            }
        });
    }

    /// Drains the current task up to the grace period, then `Offline`. An in-flight
    /// task that does not finish in time is reported `Failed(AgentStopped)`.
    #[instrument(skip(self), fields(agent_id = %self.agent_id))]
    pub async fn stop(self: &Arc<Self>) {
        self.stopping.store(true, Ordering::SeqCst);
        let in_flight = self
            .registry
            .lookup(self.agent_id)
            .await
            .ok()
            .and_then(|agent| agent.current_task_id);

        if let Some(task_id_raw) = in_flight {
            let task_id = TaskId(task_id_raw);
            let drained = tokio::time::timeout(self.config.stop_grace_period, async {
                loop {
                    match self.registry.lookup(self.agent_id).await {
                        Ok(agent) if agent.current_task_id.is_none() => return,
                        Ok(_) => tokio::time::sleep(Duration::from_millis(50)).await,
                        Err(_) => return,
                    }
                }
            })
            .await
            .is_ok();

            if !drained {
                let _ = self
                    .reports
                    .send(RuntimeReport::Failed { task_id, reason: FailureReason::AgentStopped })
                    .await;
            }
        }

        self.handle.teardown().await;
        let _ = self.registry.mutate(self.agent_id, |agent| agent.mark_offline()).await;
        self.message_bus.deregister_agent(self.agent_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicU32;

    use crate::domain::models::agent::Agent;
    use crate::domain::models::task::TaskSpec;
    use crate::services::event_store::RingBufferEventStore;
    use crate::services::event_stream::EventStreamConfig;

    struct EchoAgent {
        calls: AtomicU32,
    }

    #[async_trait]
    impl AgentHandle for EchoAgent {
        async fn process_task(&self, task: &Task) -> TaskOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            TaskOutcome::Success { result: task.payload.clone() }
        }
    }

    async fn wire() -> (Arc<AgentRuntime>, AgentId, mpsc::Receiver<RuntimeReport>) {
        let registry = AgentRegistry::shared();
        let events = EventStream::shared(EventStreamConfig::default(), RingBufferEventStore::shared(100));
        let message_bus = MessageBus::shared(16);
        let (tx, rx) = mpsc::channel(16);
        let agent = Agent::new("echo", "worker", HashSet::from(["echo".to_string()]), 1);
        let agent_id = agent.id;
        registry.register(agent).await;
        let runtime = AgentRuntime::shared(
            agent_id,
            Arc::new(EchoAgent { calls: AtomicU32::new(0) }),
            registry,
            events,
            message_bus,
            tx,
            AgentRuntimeConfig::default(),
        );
        (runtime, agent_id, rx)
    }

    #[tokio::test]
    async fn assigning_a_task_runs_it_and_reports_success() {
        let (runtime, _agent_id, mut reports) = wire().await;
        runtime.start().await;
        let task = Task::from_spec(TaskSpec::new("echo").with_required_capabilities(["echo".to_string()]));
        runtime.assign(task.clone()).await.unwrap();

        let report = reports.recv().await.unwrap();
        match report {
            RuntimeReport::Succeeded { task_id, .. } => assert_eq!(task_id, task.id),
            other => panic!("unexpected report: {other:?}"),
        }
    }

    #[tokio::test]
    async fn assign_rejects_task_needing_uncovered_capability() {
        let (runtime, _agent_id, _reports) = wire().await;
        runtime.start().await;
        let task = Task::from_spec(TaskSpec::new("x").with_required_capabilities(["unsupported".to_string()]));
        let err = runtime.assign(task).await.unwrap_err();
        assert_eq!(err, DispatchError::AssignmentRaceLost);
    }
}
