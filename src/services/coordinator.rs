//! Coordinator Facade: the public submit/cancel/query surface, and the sole owner
//! of every other service's lifecycle. Callers never touch the Task Queue, Agent
//! Registry, Dispatcher, or Event Stream directly.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::instrument;

use crate::domain::error::CoordinatorError;
use crate::domain::models::agent::{Agent, AgentId};
use crate::domain::models::config::CoordinatorConfig;
use crate::domain::models::event::{Event, EventBody, GapNotice, SequenceNumber, Subject};
use crate::domain::models::task::{Task, TaskId, TaskSpec};
use crate::domain::ports::AgentHandle;
use crate::services::agent_registry::AgentRegistry;
use crate::services::agent_runtime::{AgentRuntime, AgentRuntimeConfig, RuntimeReport};
use crate::services::dependency_resolver::DependencyResolver;
use crate::services::dispatcher::{Dispatcher, DispatcherConfig};
use crate::services::event_store::RingBufferEventStore;
use crate::services::event_stream::{EventBatch, EventFilter, EventStream, EventStreamConfig};
use crate::services::message_bus::MessageBus;
use crate::services::task_queue_service::{RetryPolicy, TaskQueueService};

/// What the caller supplies to stand up a new agent: its identity, capability set, and
/// the `AgentHandle` plug-in implementing its work.
pub struct AgentRegistration {
    pub name: String,
    pub role: String,
    pub capabilities: HashSet<String>,
    pub max_concurrent: u32,
    pub handle: Arc<dyn AgentHandle>,
}

struct Lifecycle {
    started: AtomicBool,
    background: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    reports_rx: Mutex<Option<mpsc::Receiver<RuntimeReport>>>,
}

/// The coordinator: constructs and owns the full service graph, and exposes the facade operations
/// described below.
pub struct Coordinator {
    config: CoordinatorConfig,
    queue: Arc<TaskQueueService>,
    registry: Arc<AgentRegistry>,
    events: Arc<EventStream>,
    message_bus: Arc<MessageBus>,
    dispatcher: Arc<Dispatcher>,
    dependency_resolver: DependencyResolver,
    reports_tx: mpsc::Sender<RuntimeReport>,
    runtimes: Mutex<std::collections::HashMap<AgentId, Arc<AgentRuntime>>>,
    lifecycle: Lifecycle,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Arc<Self> {
        let store = RingBufferEventStore::shared(config.event_ring_capacity);
        let events = EventStream::shared(
            EventStreamConfig {
                batch_window: std::time::Duration::from_millis(config.event_batch_window_ms),
                max_batch_size: 100,
                ring_capacity: config.event_ring_capacity,
            },
            store,
        );
        let message_bus = Arc::new(MessageBus::new(config.message_bus_inbox_capacity).with_event_stream(Arc::clone(&events)));
        let retry_policy = RetryPolicy {
            base_delay: std::time::Duration::from_secs(config.retry_base_delay_seconds),
            max_delay: std::time::Duration::from_secs(config.retry_max_delay_seconds),
        };
        let queue = TaskQueueService::shared(config.max_pending_tasks, retry_policy, Arc::clone(&events));
        let registry = AgentRegistry::shared();
        let dispatcher_config = DispatcherConfig {
            default_task_deadline: Duration::seconds(i64::try_from(config.default_task_deadline_seconds).unwrap_or(300)),
            cancel_grace: std::time::Duration::from_secs(config.cancel_grace_seconds),
            idle_poll_interval: std::time::Duration::from_millis(500),
        };
        let dispatcher = Dispatcher::shared(Arc::clone(&queue), Arc::clone(&registry), Arc::clone(&events), Arc::clone(&message_bus), dispatcher_config);
        let (reports_tx, reports_rx) = mpsc::channel(1024);

        Arc::new(Self {
            config,
            queue,
            registry,
            events,
            message_bus,
            dispatcher,
            dependency_resolver: DependencyResolver::new(),
            reports_tx,
            runtimes: Mutex::new(std::collections::HashMap::new()),
            lifecycle: Lifecycle {
                started: AtomicBool::new(false),
                background: Mutex::new(Vec::new()),
                reports_rx: Mutex::new(Some(reports_rx)),
            },
        })
    }

    /// Starts the Event Stream batcher, the Dispatcher loop, the runtime-report
    /// consumer, and the heartbeat-staleness monitor. Idempotent: a second call is a
    /// no-op.
    pub async fn start(self: &Arc<Self>) {
        if self.lifecycle.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut background = self.lifecycle.background.lock().await;
        background.push(self.events.spawn_batcher());
        background.push(self.dispatcher.spawn_loop());
        if let Some(rx) = self.lifecycle.reports_rx.lock().await.take() {
            background.push(self.dispatcher.spawn_report_consumer(rx));
        }
        background.push(self.spawn_heartbeat_monitor());
    }

    /// Periodically sweeps the Agent Registry for agents whose last heartbeat is older
    /// than `agent_heartbeat_interval_seconds * agent_unreachable_multiplier`, marking
    /// them `Unreachable` and publishing `AgentStatusChanged` for each.
    fn spawn_heartbeat_monitor(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let coordinator = Arc::clone(self);
        let tick = std::time::Duration::from_secs(self.config.agent_heartbeat_interval_seconds.max(1));
        let timeout_seconds = self.config.agent_heartbeat_interval_seconds.saturating_mul(u64::from(self.config.agent_unreachable_multiplier));
        let timeout = Duration::seconds(i64::try_from(timeout_seconds).unwrap_or(i64::MAX));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            loop {
                ticker.tick().await;
                let newly_unreachable = coordinator.registry.mark_unreachable_if_stale(timeout).await;
                for agent_id in newly_unreachable {
                    let load = coordinator.registry.lookup(agent_id).await.map(|agent| agent.load).unwrap_or(0.0);
                    coordinator.events.emit(Subject::Agent(agent_id), EventBody::AgentStatusChanged { load }).await;
                }
            }
        })
    }

    /// Graceful shutdown: stop every agent runtime (draining in-flight work up to its
    /// grace period), then abort the Dispatcher loop and Event Stream batcher.
    pub async fn stop(self: &Arc<Self>) {
        if !self.lifecycle.started.swap(false, Ordering::SeqCst) {
            return;
        }
        let runtimes: Vec<Arc<AgentRuntime>> = self.runtimes.lock().await.values().cloned().collect();
        for runtime in runtimes {
            runtime.stop().await;
        }
        let mut background = self.lifecycle.background.lock().await;
        for handle in background.drain(..) {
            handle.abort();
        }
    }

    /// Registers and starts a new agent. Returns its assigned [`AgentId`].
    #[instrument(skip(self, registration), fields(name = %registration.name))]
    pub async fn register_agent(self: &Arc<Self>, registration: AgentRegistration) -> AgentId {
        let agent = Agent::new(registration.name, registration.role, registration.capabilities, registration.max_concurrent);
        let agent_id = agent.id;
        self.registry.register(agent).await;

        let runtime = AgentRuntime::shared(
            agent_id,
            registration.handle,
            Arc::clone(&self.registry),
            Arc::clone(&self.events),
            Arc::clone(&self.message_bus),
            self.reports_tx.clone(),
            AgentRuntimeConfig {
                heartbeat_interval: std::time::Duration::from_secs(self.config.agent_heartbeat_interval_seconds),
                stop_grace_period: std::time::Duration::from_secs(self.config.cancel_grace_seconds * 6),
            },
        );
        runtime.start().await;
        self.dispatcher.register_runtime(agent_id, Arc::clone(&runtime)).await;
        self.runtimes.lock().await.insert(agent_id, runtime);
        agent_id
    }

    /// Stops and deregisters an agent. Any task currently assigned to it is reported
    /// `Failed(AgentStopped)` by the runtime's own drain logic before this returns.
    pub async fn deregister_agent(&self, agent_id: AgentId) {
        let runtime = self.runtimes.lock().await.remove(&agent_id);
        if let Some(runtime) = runtime {
            runtime.stop().await;
        }
        self.dispatcher.deregister_runtime(agent_id).await;
        self.registry.deregister(agent_id).await;
    }

    /// Validates and admits a task. `InvalidTask` if `strict_required_capabilities` is
    /// set and the spec declares none; `CyclicDependency` if any dependency id is
    /// unknown to the queue or the declared edges would form a cycle.
    #[instrument(skip(self, spec))]
    pub async fn submit(&self, spec: TaskSpec) -> Result<TaskId, CoordinatorError> {
        if self.config.strict_required_capabilities && spec.required_capabilities.is_empty() {
            return Err(CoordinatorError::InvalidTask("required_capabilities must be non-empty".to_string()));
        }
        if !spec.dependencies.is_empty() {
            let known = self.queue.known_task_ids().await;
            if !self.dependency_resolver.dependencies_known(&spec.dependencies, &known) {
                return Err(CoordinatorError::InvalidTask("dependency references an unknown task".to_string()));
            }
        }
        self.queue.submit(spec).await
    }

    pub async fn cancel(&self, task_id: TaskId) -> Result<(), CoordinatorError> {
        self.queue.cancel(task_id).await
    }

    pub async fn query(&self, task_id: TaskId) -> Result<Task, CoordinatorError> {
        self.queue.query(task_id).await
    }

    /// Passthrough to the Event Stream; see [`EventStream::subscribe`].
    pub async fn subscribe_events(
        &self,
        filter: EventFilter,
        resume_from: Option<SequenceNumber>,
    ) -> (Vec<Event>, Option<GapNotice>, broadcast::Receiver<Arc<EventBatch>>) {
        self.events.subscribe(filter, resume_from).await
    }

    /// Evicts terminal task records past their retention window. The Coordinator owns
    /// the periodic ticker for this; call from a background loop or a cron-style timer.
    pub async fn prune_expired_tasks(&self) {
        self.queue.prune_expired(Duration::seconds(i64::try_from(self.config.terminal_retention_seconds).unwrap_or(3_600))).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::domain::models::task::TaskOutcome;

    struct EchoAgent;

    #[async_trait]
    impl AgentHandle for EchoAgent {
        async fn process_task(&self, task: &Task) -> TaskOutcome {
            TaskOutcome::Success { result: task.payload.clone() }
        }
    }

    fn registration(caps: &[&str]) -> AgentRegistration {
        AgentRegistration {
            name: "worker".to_string(),
            role: "generic".to_string(),
            capabilities: caps.iter().map(|s| s.to_string()).collect(),
            max_concurrent: 1,
            handle: Arc::new(EchoAgent),
        }
    }

    #[tokio::test]
    async fn submit_rejects_missing_required_capabilities_when_strict() {
        let coordinator = Coordinator::new(CoordinatorConfig::default());
        let err = coordinator.submit(TaskSpec::new("echo")).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidTask(_)));
    }

    #[tokio::test]
    async fn submit_rejects_unknown_dependency() {
        let coordinator = Coordinator::new(CoordinatorConfig::default());
        let spec = TaskSpec::new("echo")
            .with_required_capabilities(["echo".to_string()])
            .with_dependencies([TaskId::new()]);
        let err = coordinator.submit(spec).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidTask(_)));
    }

    #[tokio::test]
    async fn end_to_end_submit_dispatch_and_complete() {
        let coordinator = Coordinator::new(CoordinatorConfig::default());
        coordinator.start().await;
        coordinator.register_agent(registration(&["echo"])).await;

        let task_id = coordinator
            .submit(TaskSpec::new("echo").with_required_capabilities(["echo".to_string()]))
            .await
            .unwrap();

        let mut succeeded = false;
        for _ in 0..50 {
            if coordinator.query(task_id).await.unwrap().status == crate::domain::models::task::TaskStatus::Succeeded {
                succeeded = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(succeeded);
        coordinator.stop().await;
    }
}
