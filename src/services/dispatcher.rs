//! Dispatcher: the single cooperative loop matching Ready tasks to capable,
//! available agents. Reads the Task Queue and Agent Registry but mutates
//! neither directly — every state change goes through their own APIs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{instrument, warn};

use crate::domain::models::agent::AgentId;
use crate::domain::models::event::{EventBody, Subject};
use crate::domain::models::message::{Message, MessageKind, Recipient};
use crate::domain::models::task::{FailureReason, Task, TaskId};
use crate::services::agent_registry::AgentRegistry;
use crate::services::agent_runtime::{AgentRuntime, RuntimeReport};
use crate::services::event_stream::{EventFilter, EventStream};
use crate::services::message_bus::MessageBus;
use crate::services::task_queue_service::TaskQueueService;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub default_task_deadline: Duration,
    pub cancel_grace: StdDuration,
    /// Upper bound on how long the loop sleeps when the ready heap is empty and no
    /// wakeup event has arrived; a fallback against a missed/dropped broadcast.
    pub idle_poll_interval: StdDuration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            default_task_deadline: Duration::seconds(300),
            cancel_grace: StdDuration::from_secs(5),
            idle_poll_interval: StdDuration::from_millis(500),
        }
    }
}

pub struct Dispatcher {
    queue: Arc<TaskQueueService>,
    registry: Arc<AgentRegistry>,
    events: Arc<EventStream>,
    message_bus: Arc<MessageBus>,
    runtimes: RwLock<HashMap<AgentId, Arc<AgentRuntime>>>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<TaskQueueService>,
        registry: Arc<AgentRegistry>,
        events: Arc<EventStream>,
        message_bus: Arc<MessageBus>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            queue,
            registry,
            events,
            message_bus,
            runtimes: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn shared(
        queue: Arc<TaskQueueService>,
        registry: Arc<AgentRegistry>,
        events: Arc<EventStream>,
        message_bus: Arc<MessageBus>,
        config: DispatcherConfig,
    ) -> Arc<Self> {
        Arc::new(Self::new(queue, registry, events, message_bus, config))
    }

    /// Registers the runtime the dispatcher should call `assign`/send Cancel commands
    /// through for `agent_id`. Owned by the Coordinator Facade, which spawns one
    /// `AgentRuntime` per registered agent.
    pub async fn register_runtime(&self, agent_id: AgentId, runtime: Arc<AgentRuntime>) {
        self.runtimes.write().await.insert(agent_id, runtime);
    }

    pub async fn deregister_runtime(&self, agent_id: AgentId) {
        self.runtimes.write().await.remove(&agent_id);
    }

    /// Consumes `RuntimeReport`s from every `AgentRuntime` and reflects the outcome on
    /// the Task Queue. Runs for the lifetime of the coordinator; the Coordinator holds
    /// the join handle to abort it on `stop()`.
    pub fn spawn_report_consumer(self: &Arc<Self>, mut reports: mpsc::Receiver<RuntimeReport>) -> tokio::task::JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(report) = reports.recv().await {
                match report {
                    RuntimeReport::Succeeded { task_id, result } => {
                        if let Err(err) = dispatcher.queue.mark_succeeded(task_id, result).await {
                            warn!(%task_id, %err, "failed to record task success");
                        }
                    }
                    RuntimeReport::Failed { task_id, reason } => {
                        if let Err(err) = dispatcher.queue.mark_failed(task_id, reason).await {
                            warn!(%task_id, %err, "failed to record task failure");
                        }
                    }
                }
            }
        })
    }

    /// Runs until the returned `JoinHandle` is aborted. One iteration: drain every
    /// currently-Ready task it can place, then suspend until a `TaskReady` /
    /// `AgentRegistered` / `AgentStatusChanged` event (or the idle poll fallback) wakes
    /// it again.
    pub fn spawn_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move { dispatcher.run().await })
    }

    async fn run(self: Arc<Self>) {
        let (_replay, _gap, mut wakeups) = self
            .events
            .subscribe(
                EventFilter { kinds: Some(vec!["task_ready", "agent_registered", "agent_status_changed"]), subject: None },
                None,
            )
            .await;

        loop {
            let mut made_progress = false;
            while let Some(task) = self.queue.pop_ready().await {
                made_progress = true;
                self.try_dispatch(task).await;
            }

            if !made_progress {
                tokio::select! {
                    _ = wakeups.recv() => {}
                    () = tokio::time::sleep(self.config.idle_poll_interval) => {}
                }
            }
        }
    }

    /// Tries every candidate in order; requeues the task unchanged if none accept.
    #[instrument(skip(self, task), fields(task_id = %task.id))]
    async fn try_dispatch(self: &Arc<Self>, task: Task) {
        let candidates = self.registry.candidates(&task.required_capabilities).await;
        if candidates.is_empty() {
            self.queue.requeue_ready(task.id).await;
            return;
        }

        for candidate in candidates {
            let Some(runtime) = self.runtimes.read().await.get(&candidate.id).cloned() else {
                continue;
            };
            // Reserve the agent's capacity first — a failed reservation just means
            // trying the next candidate. Only once it succeeds do we record the
            // assignment in the queue (`TaskAssigned`) and then start the invocation
            // (`TaskStarted`), so the two events publish in that order.
            if runtime.try_accept(&task).await.is_err() {
                continue;
            }
            if let Err(err) = self.queue.mark_assigned(task.id, candidate.id.0).await {
                warn!(task_id = %task.id, %err, "assigned task but queue rejected the transition");
                return;
            }
            runtime.start_execution(task.clone()).await;
            if let Err(err) = self.queue.mark_running(task.id).await {
                warn!(task_id = %task.id, %err, "could not mark task running after assignment");
                return;
            }
            self.arm_deadline(task, candidate.id);
            return;
        }

        // Every candidate rejected the assignment (lost the race, or stopped mid-loop).
        self.queue.requeue_ready(task.id).await;
    }

    /// Spawns the per-assignment deadline timer. On expiry it sends a Cancel command
    /// and gives the agent `cancel_grace` to finish or acknowledge before the task is
    /// failed as `Timeout` (retryable per the queue's policy) and the agent's
    /// non-ack counter is bumped — three in a row demotes it to `Error`.
    fn arm_deadline(self: &Arc<Self>, task: Task, agent_id: AgentId) {
        let dispatcher = Arc::clone(self);
        let deadline = task.deadline_or_default(self.config.default_task_deadline);
        let task_id = task.id;
        tokio::spawn(async move {
            let remaining = (deadline - chrono::Utc::now()).to_std().unwrap_or(StdDuration::ZERO);
            tokio::time::sleep(remaining).await;

            let Ok(current) = dispatcher.queue.query(task_id).await else {
                return;
            };
            if current.status.is_terminal() {
                return;
            }

            dispatcher.send_cancel(task_id, agent_id).await;
            tokio::time::sleep(dispatcher.config.cancel_grace).await;

            let Ok(current) = dispatcher.queue.query(task_id).await else {
                return;
            };
            if current.status.is_terminal() {
                return;
            }

            let (demoted, load) = dispatcher
                .registry
                .mutate(agent_id, |agent| {
                    agent.consecutive_cancel_non_acks += 1;
                    if agent.consecutive_cancel_non_acks >= 3 {
                        agent.mark_error();
                        (true, agent.load)
                    } else {
                        (false, agent.load)
                    }
                })
                .await
                .unwrap_or((false, 0.0));
            if demoted {
                dispatcher.events.emit(Subject::Agent(agent_id), EventBody::AgentStatusChanged { load }).await;
                dispatcher
                    .events
                    .emit(
                        Subject::Agent(agent_id),
                        EventBody::SystemAlert { message: format!("agent {agent_id} demoted to Error after repeated cancel non-acks") },
                    )
                    .await;
            }

            if let Err(err) = dispatcher.queue.mark_failed(task_id, FailureReason::Timeout).await {
                warn!(%task_id, %err, "could not mark timed-out task failed");
            }
        });
    }

    async fn send_cancel(&self, task_id: TaskId, agent_id: AgentId) {
        let message = Message::new(
            AgentId::new(),
            Recipient::Agent(agent_id),
            MessageKind::Command,
            serde_json::json!({ "action": "cancel", "task_id": task_id.0 }),
        );
        if self.message_bus.send(message).await.is_err() {
            warn!(%task_id, %agent_id, "could not deliver cancel command; agent may already be offline");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::domain::models::agent::Agent;
    use crate::domain::models::task::{TaskOutcome, TaskSpec, TaskStatus};
    use crate::domain::ports::AgentHandle;
    use crate::services::agent_runtime::AgentRuntimeConfig;
    use crate::services::event_stream::EventStreamConfig;
    use crate::services::event_store::RingBufferEventStore;
    use crate::services::task_queue_service::RetryPolicy;

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

    struct NeverRespondingAgent;

    #[async_trait]
    impl AgentHandle for NeverRespondingAgent {
        async fn process_task(&self, _task: &Task) -> TaskOutcome {
            std::future::pending().await
        }
    }

    struct Harness {
        dispatcher: Arc<Dispatcher>,
        queue: Arc<TaskQueueService>,
        registry: Arc<AgentRegistry>,
        events: Arc<EventStream>,
        message_bus: Arc<MessageBus>,
        reports_tx: mpsc::Sender<RuntimeReport>,
        loop_handle: tokio::task::JoinHandle<()>,
        consumer_handle: tokio::task::JoinHandle<()>,
    }

    impl Harness {
        fn abort(&self) {
            self.loop_handle.abort();
            self.consumer_handle.abort();
        }
    }

    async fn harness(config: DispatcherConfig) -> Harness {
        let events = EventStream::shared(EventStreamConfig::default(), RingBufferEventStore::shared(1000));
        let queue = TaskQueueService::shared(100, RetryPolicy::default(), Arc::clone(&events));
        let registry = AgentRegistry::shared();
        let message_bus = MessageBus::shared(16);
        let dispatcher = Dispatcher::shared(Arc::clone(&queue), Arc::clone(&registry), Arc::clone(&events), Arc::clone(&message_bus), config);

        let loop_handle = dispatcher.spawn_loop();
        let (reports_tx, rx) = mpsc::channel(16);
        let consumer_handle = dispatcher.spawn_report_consumer(rx);

        Harness { dispatcher, queue, registry, events, message_bus, reports_tx, loop_handle, consumer_handle }
    }

    async fn wire_agent(harness: &Harness, handle: Arc<dyn AgentHandle>, caps: &[&str]) -> AgentId {
        let agent = Agent::new("worker", "generic", caps.iter().map(|s| s.to_string()).collect::<HashSet<_>>(), 1);
        let agent_id = agent.id;
        harness.registry.register(agent).await;
        let runtime = AgentRuntime::shared(
            agent_id,
            handle,
            Arc::clone(&harness.registry),
            Arc::clone(&harness.events),
            Arc::clone(&harness.message_bus),
            harness.reports_tx.clone(),
            AgentRuntimeConfig::default(),
        );
        runtime.start().await;
        harness.dispatcher.register_runtime(agent_id, runtime).await;
        agent_id
    }

    #[tokio::test]
    async fn dispatches_ready_task_to_capable_agent_and_records_success() {
        let harness = harness(DispatcherConfig::default()).await;
        wire_agent(&harness, Arc::new(EchoAgent { calls: AtomicU32::new(0) }), &["echo"]).await;

        let task_id = harness.queue.submit(TaskSpec::new("echo").with_required_capabilities(["echo".to_string()])).await.unwrap();

        let mut succeeded = false;
        for _ in 0..50 {
            if harness.queue.query(task_id).await.unwrap().status == TaskStatus::Succeeded {
                succeeded = true;
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(20)).await;
        }
        assert!(succeeded);

        harness.abort();
    }

    #[tokio::test]
    async fn task_needing_uncovered_capability_stays_parked() {
        let harness = harness(DispatcherConfig::default()).await;
        wire_agent(&harness, Arc::new(EchoAgent { calls: AtomicU32::new(0) }), &["echo"]).await;

        let task_id = harness.queue.submit(TaskSpec::new("code").with_required_capabilities(["code".to_string()])).await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(100)).await;
        assert_eq!(harness.queue.query(task_id).await.unwrap().status, TaskStatus::Ready);

        harness.abort();
    }

    #[tokio::test]
    async fn expired_deadline_sends_cancel_and_times_out_the_task() {
        let config = DispatcherConfig {
            default_task_deadline: Duration::milliseconds(100),
            cancel_grace: StdDuration::from_millis(100),
            idle_poll_interval: StdDuration::from_millis(20),
        };
        let harness = harness(config).await;
        wire_agent(&harness, Arc::new(NeverRespondingAgent), &["slow"]).await;

        let task_id = harness
            .queue
            .submit(TaskSpec::new("slow").with_required_capabilities(["slow".to_string()]).with_max_retries(0))
            .await
            .unwrap();

        let mut failed = false;
        for _ in 0..100 {
            if harness.queue.query(task_id).await.unwrap().status == TaskStatus::Failed {
                failed = true;
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(20)).await;
        }
        assert!(failed);
        let task = harness.queue.query(task_id).await.unwrap();
        assert!(matches!(task.failure, Some(FailureReason::Timeout)));

        harness.abort();
    }
}
