//! Agent Coordinator
//!
//! Executes a planned subtask DAG:
//! - subtasks become ready when every dependency has succeeded
//! - ready subtasks run on a bounded worker pool, highest priority first
//! - each worker prepares context, leases a workspace, runs the agent with
//!   retries and releases the workspace on every exit path
//! - a failed dependency fails its dependants without taking a slot
//! - cancellation drains the queue and gives in-flight agents a grace period

pub mod messages;
pub mod queue;

pub use messages::{AgentMessage, MessageBus, MessageKind};
pub use queue::ReadyQueue;

use crate::agents::{Agent, AgentRegistry};
use crate::context::{ContextBundle, ContextEngine, ContextRequest, ContextScope};
use crate::error::{Error, ReasonCode, Result};
use crate::event_bus::{EventBus, OrchestrationEvent};
use crate::planner::dag;
use crate::provisioner::{IsolationProvisioner, ProvisionError, WorkspaceLease};
use crate::task::{
    Subtask, SubtaskId, SubtaskOutput, SubtaskResult, SubtaskStatus, Task, TaskResult,
};
use crate::utils::RetryConfig;
use dashmap::DashMap;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Coordinator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Worker slots shared by every task
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Agent retry policy; `max_attempts` includes the first attempt
    #[serde(default = "default_retry")]
    pub retry: RetryConfig,
    /// How long a cancelled agent may keep running before it is dropped
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
    /// Pause before a subtask that found no workspace is requeued
    #[serde(default = "default_requeue_delay_ms")]
    pub requeue_delay_ms: u64,
    /// Per-attempt agent deadline (0 disables it)
    #[serde(default = "default_subtask_timeout_secs")]
    pub subtask_timeout_secs: u64,
    /// Context scope for every subtask; derived from the task when unset
    #[serde(default)]
    pub context_scope: Option<ContextScope>,
    /// Messages retained per task on the message bus
    #[serde(default = "default_max_message_history")]
    pub max_message_history: usize,
}

fn default_max_concurrent() -> usize {
    5
}

fn default_retry() -> RetryConfig {
    RetryConfig::default().with_retry_budget(2)
}

fn default_cancel_grace_ms() -> u64 {
    5_000
}

fn default_requeue_delay_ms() -> u64 {
    50
}

fn default_subtask_timeout_secs() -> u64 {
    600
}

fn default_max_message_history() -> usize {
    1000
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            retry: default_retry(),
            cancel_grace_ms: default_cancel_grace_ms(),
            requeue_delay_ms: default_requeue_delay_ms(),
            subtask_timeout_secs: default_subtask_timeout_secs(),
            context_scope: None,
            max_message_history: default_max_message_history(),
        }
    }
}

impl CoordinatorConfig {
    /// Set the worker pool size.
    #[must_use]
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Set the agent retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the cancellation grace period.
    #[must_use]
    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace_ms = grace.as_millis() as u64;
        self
    }

    /// Set the requeue delay.
    #[must_use]
    pub fn with_requeue_delay(mut self, delay: Duration) -> Self {
        self.requeue_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the per-attempt deadline.
    #[must_use]
    pub fn with_subtask_timeout(mut self, timeout: Duration) -> Self {
        self.subtask_timeout_secs = timeout.as_secs();
        self
    }

    /// Fix the context scope.
    #[must_use]
    pub fn with_context_scope(mut self, scope: ContextScope) -> Self {
        self.context_scope = Some(scope);
        self
    }

    fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    fn requeue_delay(&self) -> Duration {
        Duration::from_millis(self.requeue_delay_ms)
    }

    fn subtask_timeout(&self) -> Option<Duration> {
        (self.subtask_timeout_secs > 0).then(|| Duration::from_secs(self.subtask_timeout_secs))
    }
}

/// Counters since the coordinator was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    /// Workers running right now
    pub in_flight: usize,
    /// Most workers ever running at once
    pub peak_in_flight: usize,
    /// Worker slots handed out (a requeued subtask counts again)
    pub dispatched: u64,
    /// Subtasks that succeeded
    pub succeeded: u64,
    /// Subtasks that failed terminally
    pub failed: u64,
    /// Subtasks returned to the queue for lack of a workspace
    pub requeued: u64,
}

#[derive(Debug, Default)]
struct Counters {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    requeued: AtomicU64,
}

/// Holds a worker slot and the in-flight count until dropped.
struct WorkerSlot {
    _permit: OwnedSemaphorePermit,
    counters: Arc<Counters>,
}

impl WorkerSlot {
    fn new(permit: OwnedSemaphorePermit, counters: Arc<Counters>) -> Self {
        let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak.fetch_max(now, Ordering::SeqCst);
        counters.dispatched.fetch_add(1, Ordering::SeqCst);
        Self {
            _permit: permit,
            counters,
        }
    }
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Forgets the subtask statuses of a task once `execute` returns.
struct StatusGuard<'a> {
    statuses: &'a DashMap<SubtaskId, SubtaskStatus>,
    ids: Vec<SubtaskId>,
}

impl Drop for StatusGuard<'_> {
    fn drop(&mut self) {
        for id in &self.ids {
            self.statuses.remove(id);
        }
    }
}

/// What a worker hands back to the dispatch loop.
enum WorkerOutcome {
    Finished(SubtaskResult),
    Requeue { subtask_id: SubtaskId, seq: u64 },
}

enum LeaseOutcome {
    Leased(WorkspaceLease),
    NoCapacity,
    Cancelled,
    Failed(String),
}

enum AttemptOutcome {
    Done(SubtaskOutput),
    Cancelled,
    Failed {
        reason: ReasonCode,
        message: String,
        retryable: bool,
    },
}

/// Runs planned subtasks on a bounded pool of agents.
pub struct Coordinator {
    config: Arc<CoordinatorConfig>,
    registry: Arc<AgentRegistry>,
    context: Arc<ContextEngine>,
    provisioner: Arc<dyn IsolationProvisioner>,
    events: Arc<EventBus>,
    messages: Arc<MessageBus>,
    slots: Arc<Semaphore>,
    counters: Arc<Counters>,
    statuses: Arc<DashMap<SubtaskId, SubtaskStatus>>,
}

impl Coordinator {
    /// Create a coordinator.
    pub fn new(
        config: CoordinatorConfig,
        registry: Arc<AgentRegistry>,
        context: Arc<ContextEngine>,
        provisioner: Arc<dyn IsolationProvisioner>,
        events: Arc<EventBus>,
    ) -> Self {
        let messages =
            Arc::new(MessageBus::new(config.max_message_history).with_events(events.clone()));
        let slots = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            config: Arc::new(config),
            registry,
            context,
            provisioner,
            events,
            messages,
            slots,
            counters: Arc::new(Counters::default()),
            statuses: Arc::new(DashMap::new()),
        }
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Run with a caller-provided message bus, typically the one the
    /// registered agents were built with.
    #[must_use]
    pub fn with_messages(mut self, messages: Arc<MessageBus>) -> Self {
        self.messages = messages;
        self
    }

    /// Inter-agent message bus.
    #[must_use]
    pub fn messages(&self) -> &Arc<MessageBus> {
        &self.messages
    }

    /// Agents available for routing.
    #[must_use]
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Free worker slots.
    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Status of a subtask while its task is being executed.
    #[must_use]
    pub fn status(&self, subtask_id: SubtaskId) -> Option<SubtaskStatus> {
        self.statuses.get(&subtask_id).map(|s| *s)
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            in_flight: self.counters.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.counters.peak.load(Ordering::SeqCst),
            dispatched: self.counters.dispatched.load(Ordering::SeqCst),
            succeeded: self.counters.succeeded.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
            requeued: self.counters.requeued.load(Ordering::SeqCst),
        }
    }

    /// Prepare one context bundle per distinct role in `subtasks` and wait
    /// for all of them. Workers then find their bundles cached.
    pub async fn warm_context(&self, task: &Task, subtasks: &[Subtask]) -> Result<usize> {
        let scope = context_scope(&self.config, &self.context, task);
        let mut seen = std::collections::HashSet::new();
        let requests: Vec<ContextRequest> = subtasks
            .iter()
            .filter(|s| seen.insert(s.role))
            .map(|s| ContextRequest::for_subtask(task, s, scope))
            .collect();
        let bundles = self.context.prepare_batch(&requests).await?;
        debug!(task_id = %task.id, roles = bundles.len(), "context warmed");
        Ok(bundles.len())
    }

    /// Execute `subtasks` for `task` until every one is terminal.
    ///
    /// Successful results in `prior` are kept and their subtasks are not run
    /// again. Every terminal result is also sent on `progress` as soon as it
    /// is known. Subtask failures are reported in the returned
    /// [`TaskResult`]; `Err` is reserved for an invalid plan or a broken
    /// worker pool.
    pub async fn execute(
        &self,
        task: &Task,
        subtasks: &[Subtask],
        prior: &[SubtaskResult],
        cancel: CancellationToken,
        progress: Option<mpsc::UnboundedSender<SubtaskResult>>,
    ) -> Result<TaskResult> {
        let started = Instant::now();
        dag::topological_order(subtasks)?;

        let by_id: HashMap<SubtaskId, &Subtask> = subtasks.iter().map(|s| (s.id, s)).collect();
        let _statuses = StatusGuard {
            statuses: &self.statuses,
            ids: by_id.keys().copied().collect(),
        };
        let mut run = RunState::new(task, progress);
        for result in prior {
            if result.is_success() && by_id.contains_key(&result.subtask_id) {
                self.statuses.insert(result.subtask_id, SubtaskStatus::Succeeded);
                run.results.insert(result.subtask_id, result.clone());
                run.order.push(result.clone());
            }
        }
        run.waiting = subtasks
            .iter()
            .filter(|s| !run.results.contains_key(&s.id))
            .map(|s| s.id)
            .collect();

        info!(
            task_id = %task.id,
            subtasks = subtasks.len(),
            resumed = run.results.len(),
            "coordinating task"
        );

        let worker = Worker {
            config: self.config.clone(),
            registry: self.registry.clone(),
            context: self.context.clone(),
            provisioner: self.provisioner.clone(),
            events: self.events.clone(),
            statuses: self.statuses.clone(),
            task: Arc::new(task.clone()),
            cancel: cancel.clone(),
        };
        let mut in_flight: JoinSet<WorkerOutcome> = JoinSet::new();
        let mut cancelled = false;

        loop {
            if !cancelled {
                self.promote(&mut run, &by_id);
                while !run.ready.is_empty() {
                    let Ok(permit) = self.slots.clone().try_acquire_owned() else {
                        break;
                    };
                    self.dispatch(&mut run, &by_id, &mut in_flight, &worker, permit);
                }
            }

            if in_flight.is_empty() && (cancelled || run.ready.is_empty()) {
                // Anything still waiting can never become ready
                let stranded: Vec<SubtaskId> = run.waiting.drain(..).collect();
                for id in stranded {
                    if let Some(subtask) = by_id.get(&id) {
                        let reason = if cancelled {
                            ReasonCode::Cancelled
                        } else {
                            ReasonCode::DependencyFailed
                        };
                        self.record(
                            &mut run,
                            SubtaskResult::failed(subtask, reason, "never became ready", 0, 0),
                        );
                    }
                }
                break;
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                    warn!(task_id = %task.id, in_flight = in_flight.len(), "task cancelled, draining queue");
                    let drained: Vec<SubtaskId> =
                        run.ready.drain().into_iter().chain(run.waiting.drain(..)).collect();
                    for id in drained {
                        if let Some(subtask) = by_id.get(&id) {
                            self.record(
                                &mut run,
                                SubtaskResult::failed(subtask, ReasonCode::Cancelled, "cancelled before start", 0, 0),
                            );
                        }
                    }
                }

                Some(joined) = in_flight.join_next() => {
                    match joined {
                        Ok(WorkerOutcome::Finished(result)) => self.record(&mut run, result),
                        Ok(WorkerOutcome::Requeue { subtask_id, seq }) => {
                            if let Some(subtask) = by_id.get(&subtask_id) {
                                if cancelled {
                                    self.record(
                                        &mut run,
                                        SubtaskResult::failed(subtask, ReasonCode::Cancelled, "cancelled while waiting for a workspace", 0, 0),
                                    );
                                } else {
                                    self.counters.requeued.fetch_add(1, Ordering::SeqCst);
                                    run.ready.push_with_seq(subtask_id, task.priority, subtask.priority, seq);
                                    debug!(task_id = %task.id, subtask_id = %subtask_id, "subtask requeued");
                                }
                            }
                        }
                        Err(e) => {
                            error!(task_id = %task.id, error = %e, "worker join failed");
                            return Err(Error::Internal(format!("worker join failed: {e}")));
                        }
                    }
                }

                permit = self.slots.clone().acquire_owned(), if !cancelled && !run.ready.is_empty() => {
                    let permit = permit.map_err(|_| Error::Internal("worker pool closed".to_string()))?;
                    self.dispatch(&mut run, &by_id, &mut in_flight, &worker, permit);
                }

                else => break,
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        let result = TaskResult::from_results(task.id, run.order, duration_ms);
        info!(
            task_id = %task.id,
            success = result.is_success(),
            subtasks = result.subtask_results.len(),
            duration_ms,
            "task coordination finished"
        );
        Ok(result)
    }

    /// Move waiting subtasks to the ready queue, or fail them when a
    /// dependency failed. Repeats until nothing changes so failures cascade.
    fn promote(&self, run: &mut RunState, by_id: &HashMap<SubtaskId, &Subtask>) {
        loop {
            let mut failed_any = false;
            let waiting: Vec<SubtaskId> = run.waiting.drain(..).collect();
            for id in waiting {
                let Some(subtask) = by_id.get(&id) else {
                    continue;
                };
                let failed_dep = subtask
                    .dependencies
                    .iter()
                    .find(|d| run.results.get(d).is_some_and(|r| !r.is_success()));

                if let Some(dep) = failed_dep {
                    let message = Error::DependencyFailed {
                        subtask_id: id,
                        dependency_id: *dep,
                    }
                    .to_string();
                    self.record(
                        run,
                        SubtaskResult::failed(subtask, ReasonCode::DependencyFailed, message, 0, 0),
                    );
                    failed_any = true;
                } else if subtask
                    .dependencies
                    .iter()
                    .all(|d| run.results.get(d).is_some_and(SubtaskResult::is_success))
                {
                    run.ready.push(id, run.task_priority, subtask.priority);
                    self.statuses.insert(id, SubtaskStatus::Queued);
                    self.events.publish(OrchestrationEvent::SubtaskQueued {
                        task_id: subtask.task_id,
                        subtask_id: id,
                    });
                } else {
                    run.waiting.push(id);
                }
            }
            if !failed_any {
                break;
            }
        }
    }

    fn dispatch(
        &self,
        run: &mut RunState,
        by_id: &HashMap<SubtaskId, &Subtask>,
        in_flight: &mut JoinSet<WorkerOutcome>,
        worker: &Worker,
        permit: OwnedSemaphorePermit,
    ) {
        let Some((id, seq)) = run.ready.pop() else {
            return;
        };
        let Some(subtask) = by_id.get(&id).map(|s| (*s).clone()) else {
            return;
        };
        let slot = WorkerSlot::new(permit, self.counters.clone());
        let worker = worker.clone();
        debug!(task_id = %subtask.task_id, subtask_id = %id, role = %subtask.role, "subtask dispatched");

        in_flight.spawn(async move {
            let _slot = slot;
            let fallback = subtask.clone();
            match AssertUnwindSafe(worker.run(subtask, seq)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(_) => {
                    error!(subtask_id = %fallback.id, "agent panicked");
                    WorkerOutcome::Finished(SubtaskResult::failed(
                        &fallback,
                        ReasonCode::AgentError,
                        "agent panicked",
                        1,
                        0,
                    ))
                }
            }
        });
    }

    fn record(&self, run: &mut RunState, result: SubtaskResult) {
        let id = result.subtask_id;
        if result.is_success() {
            self.counters.succeeded.fetch_add(1, Ordering::SeqCst);
            self.statuses.insert(id, SubtaskStatus::Succeeded);
            self.events.publish(OrchestrationEvent::SubtaskCompleted {
                task_id: run.task_id,
                subtask_id: id,
                duration_ms: result.duration_ms,
            });
        } else {
            self.counters.failed.fetch_add(1, Ordering::SeqCst);
            self.statuses.insert(id, SubtaskStatus::Failed);
            let reason = result.reason().unwrap_or(ReasonCode::AgentError);
            warn!(task_id = %run.task_id, subtask_id = %id, reason = %reason, "subtask failed");
            self.events.publish(OrchestrationEvent::SubtaskFailed {
                task_id: run.task_id,
                subtask_id: id,
                reason,
            });
        }

        if let Some(progress) = &run.progress {
            if progress.send(result.clone()).is_err() {
                debug!(task_id = %run.task_id, "progress receiver dropped");
            }
        }
        run.results.insert(id, result.clone());
        run.order.push(result);
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Bookkeeping for one `execute` call.
struct RunState {
    task_id: crate::task::TaskId,
    task_priority: u8,
    waiting: Vec<SubtaskId>,
    ready: ReadyQueue,
    results: HashMap<SubtaskId, SubtaskResult>,
    order: Vec<SubtaskResult>,
    progress: Option<mpsc::UnboundedSender<SubtaskResult>>,
}

impl RunState {
    fn new(task: &Task, progress: Option<mpsc::UnboundedSender<SubtaskResult>>) -> Self {
        Self {
            task_id: task.id,
            task_priority: task.priority,
            waiting: Vec::new(),
            ready: ReadyQueue::new(),
            results: HashMap::new(),
            order: Vec::new(),
            progress,
        }
    }
}

/// Everything a spawned worker needs, cheap to clone.
#[derive(Clone)]
struct Worker {
    config: Arc<CoordinatorConfig>,
    registry: Arc<AgentRegistry>,
    context: Arc<ContextEngine>,
    provisioner: Arc<dyn IsolationProvisioner>,
    events: Arc<EventBus>,
    statuses: Arc<DashMap<SubtaskId, SubtaskStatus>>,
    task: Arc<Task>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self, subtask: Subtask, seq: u64) -> WorkerOutcome {
        let started = Instant::now();
        if self.cancel.is_cancelled() {
            return WorkerOutcome::Finished(cancelled(&subtask, 0, 0));
        }

        let bundle = self.prepare_context(&subtask).await;
        self.statuses.insert(subtask.id, SubtaskStatus::ContextReady);

        let agent = match self.registry.route(&subtask) {
            Ok(agent) => agent,
            Err(e) => {
                return WorkerOutcome::Finished(SubtaskResult::failed(
                    &subtask,
                    ReasonCode::AgentError,
                    e.to_string(),
                    0,
                    elapsed_ms(started),
                ));
            }
        };

        let lease = match self.lease_workspace().await {
            LeaseOutcome::Leased(lease) => lease,
            LeaseOutcome::NoCapacity => {
                debug!(subtask_id = %subtask.id, "no workspace free, requeueing");
                return tokio::select! {
                    _ = tokio::time::sleep(self.config.requeue_delay()) => {
                        WorkerOutcome::Requeue { subtask_id: subtask.id, seq }
                    }
                    _ = self.cancel.cancelled() => {
                        WorkerOutcome::Finished(cancelled(&subtask, 0, elapsed_ms(started)))
                    }
                };
            }
            LeaseOutcome::Cancelled => {
                return WorkerOutcome::Finished(cancelled(&subtask, 0, elapsed_ms(started)));
            }
            LeaseOutcome::Failed(message) => {
                return WorkerOutcome::Finished(SubtaskResult::failed(
                    &subtask,
                    ReasonCode::NoCapacity,
                    message,
                    0,
                    elapsed_ms(started),
                ));
            }
        };
        self.statuses.insert(subtask.id, SubtaskStatus::WorkspaceAcquired);

        let result = self
            .execute_with_retry(&subtask, agent.as_ref(), &bundle, &lease, started)
            .await;

        lease.release();
        self.events.publish(OrchestrationEvent::WorkspaceReleased {
            task_id: self.task.id,
            subtask_id: subtask.id,
        });
        WorkerOutcome::Finished(result)
    }

    async fn prepare_context(&self, subtask: &Subtask) -> Arc<ContextBundle> {
        let scope = context_scope(&self.config, &self.context, &self.task);
        let request = ContextRequest::for_subtask(&self.task, subtask, scope);
        match self.context.prepare_context(&request).await {
            Ok(bundle) => bundle,
            Err(e) => {
                warn!(
                    subtask_id = %subtask.id,
                    error = %e,
                    "context unavailable, continuing without memory"
                );
                Arc::new(ContextBundle::empty(self.task.id, subtask.role))
            }
        }
    }

    async fn lease_workspace(&self) -> LeaseOutcome {
        let retry = &self.config.retry;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match WorkspaceLease::acquire(self.provisioner.clone(), self.task.id).await {
                Ok(lease) => return LeaseOutcome::Leased(lease),
                Err(ProvisionError::NoCapacity) => return LeaseOutcome::NoCapacity,
                Err(e) if e.is_transient() && attempt < retry.max_attempts => {
                    warn!(task_id = %self.task.id, attempt, error = %e, "provisioner unavailable, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(retry.delay_for(attempt)) => {}
                        _ = self.cancel.cancelled() => return LeaseOutcome::Cancelled,
                    }
                }
                Err(e) => return LeaseOutcome::Failed(e.to_string()),
            }
        }
    }

    async fn execute_with_retry(
        &self,
        subtask: &Subtask,
        agent: &dyn Agent,
        bundle: &ContextBundle,
        lease: &WorkspaceLease,
        started: Instant,
    ) -> SubtaskResult {
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            if self.cancel.is_cancelled() {
                return cancelled(subtask, attempt - 1, elapsed_ms(started));
            }

            self.statuses.insert(subtask.id, SubtaskStatus::Executing);
            self.events.publish(OrchestrationEvent::SubtaskStarted {
                task_id: self.task.id,
                subtask_id: subtask.id,
                role: agent.role(),
                attempt,
            });
            debug!(subtask_id = %subtask.id, role = %agent.role(), attempt, "agent executing");

            match self.attempt(subtask, agent, bundle, lease).await {
                AttemptOutcome::Done(output) => {
                    info!(
                        subtask_id = %subtask.id,
                        role = %agent.role(),
                        attempt,
                        "subtask succeeded"
                    );
                    return SubtaskResult::succeeded(subtask, output, attempt, elapsed_ms(started));
                }
                AttemptOutcome::Cancelled => {
                    return cancelled(subtask, attempt, elapsed_ms(started));
                }
                AttemptOutcome::Failed {
                    reason,
                    message,
                    retryable,
                } => {
                    if retryable && attempt < max_attempts {
                        let delay = self.config.retry.delay_for(attempt);
                        warn!(
                            subtask_id = %subtask.id,
                            attempt,
                            max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %message,
                            "attempt failed, retrying"
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => continue,
                            _ = self.cancel.cancelled() => {
                                return cancelled(subtask, attempt, elapsed_ms(started));
                            }
                        }
                    }
                    return SubtaskResult::failed(
                        subtask,
                        reason,
                        message,
                        attempt,
                        elapsed_ms(started),
                    );
                }
            }
        }
    }

    /// One agent call, bounded by the deadline and the cancellation grace.
    async fn attempt(
        &self,
        subtask: &Subtask,
        agent: &dyn Agent,
        bundle: &ContextBundle,
        lease: &WorkspaceLease,
    ) -> AttemptOutcome {
        let call = agent.execute(subtask, bundle, lease.handle());
        let deadline = self.config.subtask_timeout();
        let bounded = async move {
            match deadline {
                Some(limit) => tokio::time::timeout(limit, call).await.ok(),
                None => Some(call.await),
            }
        };
        tokio::pin!(bounded);

        let finished = tokio::select! {
            biased;
            r = &mut bounded => Some(r),
            _ = self.cancel.cancelled() => None,
        };
        let finished = match finished {
            Some(r) => r,
            None => match tokio::time::timeout(self.config.cancel_grace(), &mut bounded).await {
                Ok(r) => r,
                Err(_) => {
                    warn!(subtask_id = %subtask.id, "agent ignored cancellation, abandoning it");
                    return AttemptOutcome::Cancelled;
                }
            },
        };

        match finished {
            Some(Ok(output)) => AttemptOutcome::Done(output),
            Some(Err(e)) => AttemptOutcome::Failed {
                reason: ReasonCode::AgentError,
                retryable: e.is_retryable(),
                message: e.to_string(),
            },
            None => AttemptOutcome::Failed {
                reason: ReasonCode::Timeout,
                message: format!(
                    "no result within {}s",
                    self.config.subtask_timeout_secs
                ),
                retryable: true,
            },
        }
    }
}

fn cancelled(subtask: &Subtask, attempts: u32, duration_ms: u64) -> SubtaskResult {
    SubtaskResult::failed(subtask, ReasonCode::Cancelled, "cancelled", attempts, duration_ms)
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Configured scope, else project-specific for project tasks, else the
/// context engine default.
fn context_scope(config: &CoordinatorConfig, context: &ContextEngine, task: &Task) -> ContextScope {
    config.context_scope.unwrap_or_else(|| {
        if task.project.is_some() {
            ContextScope::ProjectSpecific
        } else {
            context.config().default_scope
        }
    })
}
