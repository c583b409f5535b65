//! Task Queue: a priority heap of Ready tasks plus the dependency indices that
//! promote, cascade-fail, and retry them. The sole writer of `Task` records;
//! every other component transacts through this API.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::{instrument, warn};

use crate::domain::error::CoordinatorError;
use crate::domain::models::event::{EventBody, Subject};
use crate::domain::models::task::{FailureReason, Task, TaskId, TaskSpec, TaskStatus};
use crate::services::dependency_resolver::DependencyResolver;
use crate::services::event_stream::EventStream;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: StdDuration,
    pub max_delay: StdDuration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { base_delay: StdDuration::from_secs(1), max_delay: StdDuration::from_secs(30) }
    }
}

impl RetryPolicy {
    /// `base * 2^retry_count`, capped at `max_delay`, with up to 20% jitter (via the
    /// same `backoff::ExponentialBackoff` the retry machinery elsewhere in the crate
    /// would use for outbound I/O).
    fn delay_for(&self, retry_count: u32) -> StdDuration {
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.base_delay)
            .with_max_interval(self.max_delay)
            .with_multiplier(2.0)
            .with_randomization_factor(0.2)
            .with_max_elapsed_time(None)
            .build();
        for _ in 0..retry_count {
            let _ = backoff.next_backoff();
        }
        backoff.next_backoff().unwrap_or(self.max_delay)
    }
}

struct ReadyEntry {
    effective_priority: i64,
    submitted_at: DateTime<Utc>,
    task_id: TaskId,
}

impl PartialEq for ReadyEntry {
    fn eq(&self, other: &Self) -> bool {
        self.effective_priority == other.effective_priority && self.submitted_at == other.submitted_at
    }
}
impl Eq for ReadyEntry {}

impl Ord for ReadyEntry {
    // BinaryHeap is a max-heap; highest effective_priority pops first, and among ties
    // the earliest submitted_at pops first.
    fn cmp(&self, other: &Self) -> Ordering {
        self.effective_priority
            .cmp(&other.effective_priority)
            .then_with(|| other.submitted_at.cmp(&self.submitted_at))
    }
}
impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub struct TaskQueueService {
    tasks: RwLock<HashMap<TaskId, Task>>,
    terminal_at: RwLock<HashMap<TaskId, DateTime<Utc>>>,
    ready_heap: RwLock<BinaryHeap<ReadyEntry>>,
    /// prerequisite → dependents still waiting on it.
    dependents: RwLock<HashMap<TaskId, HashSet<TaskId>>>,
    /// task → dependency ids not yet Succeeded.
    unresolved_deps: RwLock<HashMap<TaskId, HashSet<TaskId>>>,
    /// every known task's declared dependencies, for cycle detection and depth diagnostics.
    dependency_graph: RwLock<HashMap<TaskId, Vec<TaskId>>>,
    dependency_resolver: DependencyResolver,
    retry_policy: RetryPolicy,
    max_pending_tasks: usize,
    events: Arc<EventStream>,
}

impl TaskQueueService {
    pub fn new(max_pending_tasks: usize, retry_policy: RetryPolicy, events: Arc<EventStream>) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            terminal_at: RwLock::new(HashMap::new()),
            ready_heap: RwLock::new(BinaryHeap::new()),
            dependents: RwLock::new(HashMap::new()),
            unresolved_deps: RwLock::new(HashMap::new()),
            dependency_graph: RwLock::new(HashMap::new()),
            dependency_resolver: DependencyResolver::new(),
            retry_policy,
            max_pending_tasks,
            events,
        }
    }

    pub fn shared(max_pending_tasks: usize, retry_policy: RetryPolicy, events: Arc<EventStream>) -> Arc<Self> {
        Arc::new(Self::new(max_pending_tasks, retry_policy, events))
    }

    pub async fn known_task_ids(&self) -> HashSet<TaskId> {
        self.tasks.read().await.keys().copied().collect()
    }

    /// Admits a spec: rejects `CyclicDependency`, otherwise inserts `Pending` or
    /// directly `Ready` depending on whether its dependencies have already succeeded.
    #[instrument(skip(self, spec))]
    pub async fn submit(&self, spec: TaskSpec) -> Result<TaskId, CoordinatorError> {
        if self.tasks.read().await.len() >= self.max_pending_tasks {
            return Err(CoordinatorError::QueueFull);
        }

        let task = Task::from_spec(spec);
        let task_id = task.id;

        {
            let mut graph = self.dependency_graph.write().await;
            graph.insert(task_id, task.dependencies.iter().copied().collect());
            if self.dependency_resolver.detect_cycle(&graph).is_some() {
                graph.remove(&task_id);
                return Err(CoordinatorError::CyclicDependency);
            }
        }

        let tasks = self.tasks.read().await;
        let unresolved: HashSet<TaskId> = task
            .dependencies
            .iter()
            .copied()
            .filter(|dep| tasks.get(dep).map_or(true, |t| t.status != TaskStatus::Succeeded))
            .collect();
        drop(tasks);

        for &dep in &task.dependencies {
            self.dependents.write().await.entry(dep).or_default().insert(task_id);
        }

        self.events.emit(Subject::Task(task_id), EventBody::TaskSubmitted).await;

        let mut task = task;
        if unresolved.is_empty() {
            task.transition_to(TaskStatus::Ready).map_err(CoordinatorError::InvalidTask)?;
            self.push_ready_async(&task).await;
            self.events.emit(Subject::Task(task_id), EventBody::TaskReady).await;
        } else {
            self.unresolved_deps.write().await.insert(task_id, unresolved);
        }

        self.tasks.write().await.insert(task_id, task);
        Ok(task_id)
    }

    async fn push_ready_async(&self, task: &Task) {
        self.ready_heap.write().await.push(ReadyEntry {
            effective_priority: task.effective_priority(),
            submitted_at: task.submitted_at,
            task_id: task.id,
        });
    }

    pub async fn query(&self, task_id: TaskId) -> Result<Task, CoordinatorError> {
        self.tasks
            .read()
            .await
            .get(&task_id)
            .cloned()
            .ok_or(CoordinatorError::UnknownTask(task_id.0))
    }

    /// Removes the highest-priority Ready task from the heap. The caller (Dispatcher)
    /// owns it until it calls `mark_assigned` or `requeue_ready`.
    pub async fn pop_ready(&self) -> Option<Task> {
        loop {
            let entry = self.ready_heap.write().await.pop()?;
            let tasks = self.tasks.read().await;
            match tasks.get(&entry.task_id) {
                Some(task) if task.status == TaskStatus::Ready => return Some(task.clone()),
                // Stale entry (task was cancelled or already reassigned); keep draining.
                _ => continue,
            }
        }
    }

    /// Puts a popped task back without touching its priority — used when no capable
    /// agent was found or an assignment race was lost.
    pub async fn requeue_ready(&self, task_id: TaskId) {
        if let Some(task) = self.tasks.read().await.get(&task_id).cloned() {
            if task.status == TaskStatus::Ready {
                self.push_ready_async(&task).await;
            }
        }
    }

    pub async fn mark_assigned(&self, task_id: TaskId, agent_id: uuid::Uuid) -> Result<(), CoordinatorError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&task_id).ok_or(CoordinatorError::UnknownTask(task_id.0))?;
        task.transition_to(TaskStatus::Assigned).map_err(CoordinatorError::InvalidTask)?;
        task.last_assigned_agent = Some(agent_id);
        drop(tasks);
        self.events
            .emit(Subject::Task(task_id), EventBody::TaskAssigned { agent_id: crate::domain::models::agent::AgentId(agent_id) })
            .await;
        Ok(())
    }

    pub async fn mark_running(&self, task_id: TaskId) -> Result<(), CoordinatorError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&task_id).ok_or(CoordinatorError::UnknownTask(task_id.0))?;
        task.transition_to(TaskStatus::Running).map_err(CoordinatorError::InvalidTask)
    }

    /// Marks Succeeded and promotes any dependents whose last unresolved dependency
    /// this was.
    #[instrument(skip(self, result))]
    pub async fn mark_succeeded(&self, task_id: TaskId, result: serde_json::Value) -> Result<(), CoordinatorError> {
        {
            let mut tasks = self.tasks.write().await;
            let task = tasks.get_mut(&task_id).ok_or(CoordinatorError::UnknownTask(task_id.0))?;
            task.mark_succeeded(result.clone()).map_err(CoordinatorError::InvalidTask)?;
        }
        self.terminal_at.write().await.insert(task_id, Utc::now());
        self.events
            .emit(Subject::Task(task_id), EventBody::TaskCompleted { result })
            .await;
        self.promote_dependents(task_id).await;
        Ok(())
    }

    async fn promote_dependents(&self, succeeded: TaskId) {
        let dependents = self.dependents.write().await.remove(&succeeded).unwrap_or_default();
        for dependent in dependents {
            let became_ready = {
                let mut unresolved = self.unresolved_deps.write().await;
                if let Some(set) = unresolved.get_mut(&dependent) {
                    set.remove(&succeeded);
                    if set.is_empty() {
                        unresolved.remove(&dependent);
                        true
                    } else {
                        false
                    }
                } else {
                    false
                }
            };
            if became_ready {
                let task = {
                    let mut tasks = self.tasks.write().await;
                    match tasks.get_mut(&dependent) {
                        Some(task) if task.status == TaskStatus::Pending => {
                            if task.transition_to(TaskStatus::Ready).is_err() {
                                continue;
                            }
                            task.clone()
                        }
                        _ => continue,
                    }
                };
                self.push_ready_async(&task).await;
                self.events.emit(Subject::Task(dependent), EventBody::TaskReady).await;
            }
        }
    }

    /// Marks Failed. Agent-caused failures/timeouts retry per policy if budget remains;
    /// everything else (including retry exhaustion) cascades `DependencyFailed` to
    /// every transitive dependent — cascading is mandatory.
    #[instrument(skip(self))]
    pub async fn mark_failed(self: &Arc<Self>, task_id: TaskId, reason: FailureReason) -> Result<(), CoordinatorError> {
        let (retryable, retry_count, max_retries) = {
            let tasks = self.tasks.read().await;
            let task = tasks.get(&task_id).ok_or(CoordinatorError::UnknownTask(task_id.0))?;
            (reason.is_retryable(), task.retry_count, task.max_retries)
        };

        if retryable && retry_count < max_retries {
            // The attempt still failed, even though the task itself will retry rather
            // than terminate — publish the fact before the retry is scheduled.
            self.events.emit(Subject::Task(task_id), EventBody::TaskFailed { reason: reason.clone() }).await;
            self.schedule_retry(task_id, reason, retry_count);
            return Ok(());
        }

        {
            let mut tasks = self.tasks.write().await;
            let task = tasks.get_mut(&task_id).ok_or(CoordinatorError::UnknownTask(task_id.0))?;
            task.mark_failed(reason.clone()).map_err(CoordinatorError::InvalidTask)?;
        }
        self.terminal_at.write().await.insert(task_id, Utc::now());
        self.events.emit(Subject::Task(task_id), EventBody::TaskFailed { reason }).await;
        Box::pin(self.cascade_fail(task_id)).await;
        Ok(())
    }

    fn schedule_retry(self: &Arc<Self>, task_id: TaskId, reason: FailureReason, retry_count: u32) {
        let delay = self.retry_policy.delay_for(retry_count);
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            queue
                .events
                .emit(
                    Subject::Task(task_id),
                    EventBody::TaskRetryScheduled { delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), retry_count: retry_count + 1 },
                )
                .await;
            tokio::time::sleep(delay).await;
            let task = {
                let mut tasks = queue.tasks.write().await;
                match tasks.get_mut(&task_id) {
                    Some(task) if !task.status.is_terminal() => {
                        task.retry_count += 1;
                        task.failure = Some(reason);
                        if task.transition_to(TaskStatus::Ready).is_err() {
                            return;
                        }
                        task.clone()
                    }
                    _ => return,
                }
            };
            queue.push_ready_async(&task).await;
            queue.events.emit(Subject::Task(task_id), EventBody::TaskReady).await;
        });
    }

    async fn cascade_fail(self: &Arc<Self>, failed: TaskId) {
        let dependents = self.dependents.write().await.remove(&failed).unwrap_or_default();
        for dependent in dependents {
            self.unresolved_deps.write().await.remove(&dependent);
            let transitioned = {
                let mut tasks = self.tasks.write().await;
                match tasks.get_mut(&dependent) {
                    Some(task) if !task.status.is_terminal() => {
                        task.mark_failed(FailureReason::DependencyFailed(failed)).is_ok()
                    }
                    _ => false,
                }
            };
            if transitioned {
                self.terminal_at.write().await.insert(dependent, Utc::now());
                self.events
                    .emit(Subject::Task(dependent), EventBody::TaskFailed { reason: FailureReason::DependencyFailed(failed) })
                    .await;
                Box::pin(self.cascade_fail(dependent)).await;
            }
        }
    }

    /// Idempotent on already-terminal tasks. Running tasks are the Dispatcher's
    /// responsibility (it sends the agent a Cancel and reports back here); every other
    /// non-terminal status is cancelled immediately.
    #[instrument(skip(self))]
    pub async fn cancel(self: &Arc<Self>, task_id: TaskId) -> Result<(), CoordinatorError> {
        let already_terminal_or_running = {
            let tasks = self.tasks.read().await;
            let task = tasks.get(&task_id).ok_or(CoordinatorError::UnknownTask(task_id.0))?;
            task.status.is_terminal() || task.status == TaskStatus::Running
        };
        if already_terminal_or_running {
            return Ok(());
        }

        {
            let mut tasks = self.tasks.write().await;
            let task = tasks.get_mut(&task_id).ok_or(CoordinatorError::UnknownTask(task_id.0))?;
            task.mark_cancelled().map_err(CoordinatorError::InvalidTask)?;
        }
        self.terminal_at.write().await.insert(task_id, Utc::now());
        self.events.emit(Subject::Task(task_id), EventBody::TaskCancelled).await;
        Box::pin(self.cascade_fail(task_id)).await;
        Ok(())
    }

    /// Marks a `Running` task `Cancelled` once the Dispatcher's grace period elapses.
    pub async fn mark_cancelled(self: &Arc<Self>, task_id: TaskId) -> Result<(), CoordinatorError> {
        {
            let mut tasks = self.tasks.write().await;
            let task = tasks.get_mut(&task_id).ok_or(CoordinatorError::UnknownTask(task_id.0))?;
            task.mark_cancelled().map_err(CoordinatorError::InvalidTask)?;
        }
        self.terminal_at.write().await.insert(task_id, Utc::now());
        self.events.emit(Subject::Task(task_id), EventBody::TaskCancelled).await;
        Box::pin(self.cascade_fail(task_id)).await;
        Ok(())
    }

    /// Evicts terminal task records older than `retention`. Call periodically; the
    /// Coordinator Facade owns the ticker.
    pub async fn prune_expired(&self, retention: Duration) {
        let cutoff = Utc::now() - retention;
        let expired: Vec<TaskId> = self
            .terminal_at
            .read()
            .await
            .iter()
            .filter(|&(_, &at)| at < cutoff)
            .map(|(&id, _)| id)
            .collect();
        if expired.is_empty() {
            return;
        }
        let mut tasks = self.tasks.write().await;
        let mut terminal_at = self.terminal_at.write().await;
        let mut graph = self.dependency_graph.write().await;
        for id in &expired {
            tasks.remove(id);
            terminal_at.remove(id);
            graph.remove(id);
        }
        drop((tasks, terminal_at, graph));
        warn!(count = expired.len(), "pruned expired terminal task records");
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::event_store::RingBufferEventStore;
    use crate::services::event_stream::EventStreamConfig;

    fn queue() -> Arc<TaskQueueService> {
        let events = EventStream::shared(EventStreamConfig::default(), RingBufferEventStore::shared(1000));
        TaskQueueService::shared(100, RetryPolicy::default(), events)
    }

    #[tokio::test]
    async fn submit_without_dependencies_is_immediately_ready() {
        let queue = queue();
        let id = queue.submit(TaskSpec::new("echo")).await.unwrap();
        assert_eq!(queue.query(id).await.unwrap().status, TaskStatus::Ready);
        assert!(queue.pop_ready().await.is_some());
    }

    #[tokio::test]
    async fn submit_with_unmet_dependency_stays_pending_until_promoted() {
        let queue = queue();
        let dep_id = queue.submit(TaskSpec::new("dep")).await.unwrap();
        let dependent_id = queue.submit(TaskSpec::new("dependent").with_dependencies([dep_id])).await.unwrap();
        assert_eq!(queue.query(dependent_id).await.unwrap().status, TaskStatus::Pending);

        queue.mark_assigned(dep_id, uuid::Uuid::new_v4()).await.unwrap();
        queue.mark_running(dep_id).await.unwrap();
        queue.mark_succeeded(dep_id, serde_json::Value::Null).await.unwrap();

        assert_eq!(queue.query(dependent_id).await.unwrap().status, TaskStatus::Ready);
    }

    #[tokio::test]
    async fn submit_rejects_a_cycle() {
        let queue = queue();
        // A cycle cannot be expressed by two independent submits that each reference
        // the other's not-yet-existing id, so construct the adjacency directly instead.
        let a = TaskId::new();
        let b = TaskId::new();
        let mut graph = queue.dependency_graph.write().await;
        graph.insert(a, vec![b]);
        graph.insert(b, vec![a]);
        assert!(queue.dependency_resolver.detect_cycle(&graph).is_some());
    }

    #[tokio::test]
    async fn failure_cascades_to_dependents() {
        let queue = queue();
        let dep_id = queue.submit(TaskSpec::new("dep").with_max_retries(0)).await.unwrap();
        let dependent_id = queue.submit(TaskSpec::new("dependent").with_dependencies([dep_id])).await.unwrap();

        queue.mark_assigned(dep_id, uuid::Uuid::new_v4()).await.unwrap();
        queue.mark_running(dep_id).await.unwrap();
        queue.mark_failed(dep_id, FailureReason::ToolFailed("x".into())).await.unwrap();

        let dependent = queue.query(dependent_id).await.unwrap();
        assert_eq!(dependent.status, TaskStatus::Failed);
        assert!(matches!(dependent.failure, Some(FailureReason::DependencyFailed(id)) if id == dep_id));
    }

    #[tokio::test]
    async fn agent_caused_failure_retries_and_demotes_priority() {
        let queue = queue();
        let id = queue.submit(TaskSpec::new("flaky").with_max_retries(2).with_priority(5)).await.unwrap();
        queue.mark_assigned(id, uuid::Uuid::new_v4()).await.unwrap();
        queue.mark_running(id).await.unwrap();
        queue.mark_failed(id, FailureReason::Timeout).await.unwrap();

        tokio::time::sleep(StdDuration::from_millis(1300)).await;
        let task = queue.query(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Ready);
        assert_eq!(task.retry_count, 1);
        assert_eq!(task.effective_priority(), 6);
    }

    #[tokio::test]
    async fn cancel_is_idempotent_on_terminal_tasks() {
        let queue = queue();
        let id = queue.submit(TaskSpec::new("x").with_max_retries(0)).await.unwrap();
        queue.mark_assigned(id, uuid::Uuid::new_v4()).await.unwrap();
        queue.mark_running(id).await.unwrap();
        queue.mark_succeeded(id, serde_json::Value::Null).await.unwrap();

        queue.cancel(id).await.unwrap();
        assert_eq!(queue.query(id).await.unwrap().status, TaskStatus::Succeeded);
    }

    #[tokio::test]
    async fn queue_full_rejects_submit_past_the_limit() {
        let events = EventStream::shared(EventStreamConfig::default(), RingBufferEventStore::shared(100));
        let queue = TaskQueueService::shared(1, RetryPolicy::default(), events);
        queue.submit(TaskSpec::new("a")).await.unwrap();
        let err = queue.submit(TaskSpec::new("b")).await.unwrap_err();
        assert_eq!(err, CoordinatorError::QueueFull);
    }
}
