//! Workflow State Machine
//!
//! Drives a task through
//! `created → planning → ready_for_dispatch → (awaiting_approval) → executing
//! → aggregating → done`, with `failed` reachable from every non-terminal
//! state.
//!
//! Every transition is checkpointed before the next state's side effects
//! begin, and every subtask result is checkpointed as it arrives, so a
//! restarted process resumes from the last committed state without running
//! succeeded subtasks again.

pub mod approval;
pub mod checkpoint;
pub mod estimate;
pub mod sqlite;
pub mod state;

pub use approval::{ApprovalDecision, ApprovalGate};
pub use checkpoint::{
    Checkpoint, CheckpointError, CheckpointStore, CheckpointSummary, InMemoryCheckpointStore,
};
pub use estimate::WorkflowEstimate;
pub use sqlite::SqliteCheckpointStore;
pub use state::WorkflowState;

use crate::context::ContextEngine;
use crate::coordinator::Coordinator;
use crate::error::{Error, Result};
use crate::event_bus::{EventBus, OrchestrationEvent};
use crate::learning::{LearningEngine, Outcome};
use crate::planner::TaskPlanner;
use crate::task::{Task, TaskId, TaskResult};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Workflow configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// How long to wait for an approval decision
    #[serde(default = "default_approval_timeout_secs")]
    pub approval_timeout_secs: u64,
    /// Estimated cost at which approval is required
    #[serde(default = "default_approval_cost_threshold")]
    pub approval_cost_threshold_usd: f64,
    /// Skip the approval wait
    #[serde(default)]
    pub auto_approve: bool,
    /// Age after which finished checkpoints are cleaned up
    #[serde(default = "default_retention_days")]
    pub checkpoint_retention_days: u32,
}

fn default_approval_timeout_secs() -> u64 {
    300
}

fn default_approval_cost_threshold() -> f64 {
    1.0
}

fn default_retention_days() -> u32 {
    30
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            approval_timeout_secs: default_approval_timeout_secs(),
            approval_cost_threshold_usd: default_approval_cost_threshold(),
            auto_approve: false,
            checkpoint_retention_days: default_retention_days(),
        }
    }
}

impl WorkflowConfig {
    /// Approval timeout as a duration.
    #[must_use]
    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout_secs)
    }

    /// Set the approval timeout.
    #[must_use]
    pub fn with_approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout_secs = timeout.as_secs();
        self
    }

    /// Set the approval cost threshold.
    #[must_use]
    pub fn with_cost_threshold(mut self, usd: f64) -> Self {
        self.approval_cost_threshold_usd = usd;
        self
    }

    /// Approve automatically instead of waiting.
    #[must_use]
    pub fn with_auto_approve(mut self, auto: bool) -> Self {
        self.auto_approve = auto;
        self
    }
}

/// Removes the running marker of a task on every exit path.
struct RunGuard<'a> {
    running: &'a DashMap<TaskId, CancellationToken>,
    task_id: TaskId,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.remove(&self.task_id);
    }
}

/// The workflow engine.
pub struct WorkflowEngine {
    config: WorkflowConfig,
    planner: TaskPlanner,
    context: Arc<ContextEngine>,
    coordinator: Arc<Coordinator>,
    learning: Arc<LearningEngine>,
    checkpoints: Arc<dyn CheckpointStore>,
    events: Arc<EventBus>,
    approvals: ApprovalGate,
    running: DashMap<TaskId, CancellationToken>,
}

impl WorkflowEngine {
    /// Create a workflow engine.
    pub fn new(
        config: WorkflowConfig,
        planner: TaskPlanner,
        context: Arc<ContextEngine>,
        coordinator: Arc<Coordinator>,
        learning: Arc<LearningEngine>,
        checkpoints: Arc<dyn CheckpointStore>,
        events: Arc<EventBus>,
    ) -> Self {
        let approvals = ApprovalGate::new(config.approval_timeout());
        Self {
            config,
            planner,
            context,
            coordinator,
            learning,
            checkpoints,
            events,
            approvals,
            running: DashMap::new(),
        }
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Coordinator used for execution.
    #[must_use]
    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Learning engine fed with outcomes.
    #[must_use]
    pub fn learning(&self) -> &Arc<LearningEngine> {
        &self.learning
    }

    /// Checkpoint store.
    #[must_use]
    pub fn checkpoints(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpoints
    }

    /// Tasks waiting for an approval decision.
    pub async fn pending_approvals(&self) -> Vec<TaskId> {
        self.approvals.pending().await
    }

    /// Accept a task and write its first checkpoint.
    pub async fn submit(&self, task: Task) -> Result<TaskId> {
        let task_id = task.id;
        let mut checkpoint = Checkpoint::new(task);
        checkpoint.touch();
        self.checkpoints.save(&checkpoint).await?;
        self.events
            .publish(OrchestrationEvent::TaskCreated { task_id });
        info!(task_id = %task_id, "task submitted");
        Ok(task_id)
    }

    /// Latest checkpoint of a task.
    pub async fn checkpoint(&self, task_id: TaskId) -> Result<Checkpoint> {
        self.checkpoints
            .load(task_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("task {task_id}")))
    }

    /// Every stored checkpoint.
    pub async fn list(&self) -> Result<Vec<CheckpointSummary>> {
        Ok(self.checkpoints.list().await?)
    }

    /// Drop finished checkpoints older than the retention period.
    pub async fn cleanup(&self) -> Result<usize> {
        Ok(self
            .checkpoints
            .cleanup_older_than(self.config.checkpoint_retention_days)
            .await?)
    }

    /// Plan a submitted task without dispatching it.
    ///
    /// An ambiguous description returns [`Error::AmbiguousScope`] and leaves
    /// the task pending.
    pub async fn plan(&self, task_id: TaskId) -> Result<Checkpoint> {
        let mut checkpoint = self.checkpoint(task_id).await?;
        if matches!(
            checkpoint.state,
            WorkflowState::Created | WorkflowState::Planning
        ) {
            self.run_planning(&mut checkpoint).await?;
        }
        Ok(checkpoint)
    }

    /// Drive a task from its committed state to a terminal state.
    ///
    /// Returns the aggregated result, which may describe a failed task.
    /// `Err` means the workflow stopped before execution finished: an
    /// ambiguous scope, a rejected or expired approval, or a store failure.
    pub async fn run(&self, task_id: TaskId) -> Result<TaskResult> {
        let cancel = CancellationToken::new();
        match self.running.entry(task_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(Error::Internal(format!("task {task_id} is already running")));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(cancel.clone());
            }
        }
        let _guard = RunGuard {
            running: &self.running,
            task_id,
        };

        let mut checkpoint = self.checkpoint(task_id).await?;
        self.drive(&mut checkpoint, &cancel).await
    }

    /// Continue a task from its last checkpoint, e.g. after a restart.
    ///
    /// Subtasks whose results already succeeded are not run again.
    pub async fn resume(&self, task_id: TaskId) -> Result<TaskResult> {
        let checkpoint = self.checkpoint(task_id).await?;
        info!(
            task_id = %task_id,
            state = %checkpoint.state,
            completed = checkpoint.completed().len(),
            "resuming task"
        );
        self.run(task_id).await
    }

    /// Approve a task waiting for (or about to wait for) a decision.
    pub async fn approve(&self, task_id: TaskId) -> Result<bool> {
        self.decide(task_id, true).await
    }

    /// Reject a task waiting for (or about to wait for) a decision.
    pub async fn reject(&self, task_id: TaskId) -> Result<bool> {
        self.decide(task_id, false).await
    }

    /// Cancel a running task. Returns whether it was running.
    pub fn cancel(&self, task_id: TaskId) -> bool {
        match self.running.get(&task_id) {
            Some(token) => {
                token.cancel();
                info!(task_id = %task_id, "task cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Move a failed task back to `created`.
    ///
    /// The plan and succeeded subtask results are kept, so the next run only
    /// executes what did not succeed.
    pub async fn retry(&self, task_id: TaskId) -> Result<Checkpoint> {
        let mut checkpoint = self.checkpoint(task_id).await?;
        if checkpoint.state != WorkflowState::Failed {
            return Err(Error::InvalidTransition {
                from: checkpoint.state.to_string(),
                to: WorkflowState::Created.to_string(),
            });
        }
        checkpoint.task.retry()?;
        checkpoint.state = WorkflowState::Created;
        checkpoint.results = checkpoint.completed();
        checkpoint.result = None;
        checkpoint.outcome_id = None;
        checkpoint.error = None;
        checkpoint.touch();
        self.checkpoints.save(&checkpoint).await?;
        self.events.publish(OrchestrationEvent::TaskStateChanged {
            task_id,
            from: WorkflowState::Failed,
            to: WorkflowState::Created,
        });
        info!(task_id = %task_id, kept = checkpoint.results.len(), "task retried");
        Ok(checkpoint)
    }

    async fn decide(&self, task_id: TaskId, approved: bool) -> Result<bool> {
        let checkpoint = self.checkpoint(task_id).await?;
        if !checkpoint.state.accepts_approval() {
            let to = if approved {
                WorkflowState::Executing
            } else {
                WorkflowState::Failed
            };
            return Err(Error::InvalidTransition {
                from: checkpoint.state.to_string(),
                to: to.to_string(),
            });
        }
        let delivered = self.approvals.resolve(task_id, approved).await;
        info!(task_id = %task_id, approved, delivered, "approval decision received");
        Ok(delivered)
    }

    async fn drive(&self, checkpoint: &mut Checkpoint, cancel: &CancellationToken) -> Result<TaskResult> {
        loop {
            match checkpoint.state {
                WorkflowState::Created | WorkflowState::Planning => {
                    self.run_planning(checkpoint).await?;
                }
                WorkflowState::ReadyForDispatch => {
                    let needs_approval = checkpoint
                        .estimate
                        .as_ref()
                        .is_some_and(|e| e.requires_approval);
                    if needs_approval && !self.config.auto_approve {
                        self.transition(checkpoint, WorkflowState::AwaitingApproval)
                            .await?;
                    } else {
                        if needs_approval {
                            info!(task_id = %checkpoint.task_id(), "approval granted automatically");
                        }
                        self.transition(checkpoint, WorkflowState::Executing).await?;
                    }
                }
                WorkflowState::AwaitingApproval => {
                    self.await_approval(checkpoint, cancel).await?;
                }
                WorkflowState::Executing => self.execute(checkpoint, cancel).await?,
                WorkflowState::Aggregating => self.aggregate(checkpoint).await?,
                WorkflowState::Done | WorkflowState::Failed => {
                    return checkpoint.result.clone().ok_or_else(|| {
                        Error::InvalidTransition {
                            from: checkpoint.state.to_string(),
                            to: WorkflowState::Executing.to_string(),
                        }
                    });
                }
            }
        }
    }

    async fn run_planning(&self, checkpoint: &mut Checkpoint) -> Result<()> {
        if checkpoint.state == WorkflowState::Created {
            self.transition(checkpoint, WorkflowState::Planning).await?;
        }

        let plan = match checkpoint.plan.take() {
            Some(plan) => {
                debug!(task_id = %checkpoint.task_id(), "reusing existing plan");
                plan
            }
            None => match self
                .planner
                .plan_with_memory(&checkpoint.task, &self.context)
                .await
            {
                Ok(plan) => plan,
                Err(Error::AmbiguousScope(reason)) => {
                    warn!(task_id = %checkpoint.task_id(), %reason, "task scope is ambiguous");
                    checkpoint.error = Some(reason.clone());
                    self.transition(checkpoint, WorkflowState::Created).await?;
                    return Err(Error::AmbiguousScope(reason));
                }
                Err(e) => {
                    self.fail(checkpoint, e.to_string()).await?;
                    return Err(e);
                }
            },
        };

        let estimate =
            WorkflowEstimate::for_plan(&plan, self.config.approval_cost_threshold_usd);
        info!(
            task_id = %checkpoint.task_id(),
            complexity = %plan.complexity.level,
            strategy = %plan.strategy.as_str(),
            subtasks = plan.subtasks.len(),
            cost_usd = estimate.cost_usd,
            duration_minutes = estimate.duration_minutes,
            requires_approval = estimate.requires_approval,
            "task planned"
        );
        checkpoint.task.complexity = Some(plan.complexity.level);
        checkpoint.task.subtasks = plan.subtasks.iter().map(|s| s.id).collect();
        checkpoint.estimate = Some(estimate);
        checkpoint.plan = Some(plan);
        checkpoint.error = None;
        self.transition(checkpoint, WorkflowState::ReadyForDispatch)
            .await
    }

    async fn await_approval(&self, checkpoint: &mut Checkpoint, cancel: &CancellationToken) -> Result<()> {
        let task_id = checkpoint.task_id();
        let rx = self.approvals.register(task_id).await;
        let estimated_cost_usd = checkpoint.estimate.as_ref().map_or(0.0, |e| e.cost_usd);
        self.events.publish(OrchestrationEvent::ApprovalRequired {
            task_id,
            estimated_cost_usd,
        });
        info!(task_id = %task_id, estimated_cost_usd, "waiting for approval");

        let decision = tokio::select! {
            decision = self.approvals.wait(task_id, rx) => decision,
            _ = cancel.cancelled() => {
                self.approvals.withdraw(task_id).await;
                ApprovalDecision::Rejected
            }
        };

        if decision.is_approved() {
            self.transition(checkpoint, WorkflowState::Executing).await
        } else {
            warn!(task_id = %task_id, ?decision, "task not approved");
            self.fail(checkpoint, format!("approval {decision:?}").to_lowercase())
                .await?;
            Err(Error::ApprovalRejected(task_id))
        }
    }

    async fn execute(&self, checkpoint: &mut Checkpoint, cancel: &CancellationToken) -> Result<()> {
        let Some(plan) = checkpoint.plan.clone() else {
            let message = "no plan to execute".to_string();
            self.fail(checkpoint, message.clone()).await?;
            return Err(Error::Checkpoint(message));
        };

        if let Err(e) = self
            .coordinator
            .warm_context(&checkpoint.task, &plan.subtasks)
            .await
        {
            warn!(task_id = %checkpoint.task_id(), error = %e, "context warm-up failed");
        }

        let prior = checkpoint.completed();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let execution = self.coordinator.execute(
            &checkpoint.task,
            &plan.subtasks,
            &prior,
            cancel.clone(),
            Some(tx),
        );

        // Commit every result as it arrives
        let mut progress = checkpoint.clone();
        let checkpoints = Arc::clone(&self.checkpoints);
        let persist = async move {
            while let Some(result) = rx.recv().await {
                progress.record_result(result);
                progress.touch();
                if let Err(e) = checkpoints.save(&progress).await {
                    warn!(task_id = %progress.task_id(), error = %e, "progress checkpoint failed");
                }
            }
            progress
        };

        let (outcome, progress) = tokio::join!(execution, persist);
        *checkpoint = progress;

        match outcome {
            Ok(result) => {
                checkpoint.results = result.subtask_results.clone();
                checkpoint.result = Some(result);
                checkpoint.outcome_id = Some(Uuid::new_v4());
                self.transition(checkpoint, WorkflowState::Aggregating)
                    .await
            }
            Err(e) => {
                self.fail(checkpoint, e.to_string()).await?;
                Err(e)
            }
        }
    }

    async fn aggregate(&self, checkpoint: &mut Checkpoint) -> Result<()> {
        let Some(result) = checkpoint.result.clone() else {
            let message = "no result to aggregate".to_string();
            self.fail(checkpoint, message.clone()).await?;
            return Err(Error::Checkpoint(message));
        };

        let outcome_id = match checkpoint.outcome_id {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4();
                checkpoint.outcome_id = Some(id);
                checkpoint.touch();
                self.checkpoints.save(checkpoint).await?;
                id
            }
        };

        let mut outcome =
            Outcome::from_result(&checkpoint.task, &result, checkpoint.plan.as_ref()).with_id(outcome_id);
        if let Some(estimate) = &checkpoint.estimate {
            outcome = outcome.with_estimate(estimate.duration_ms());
        }
        // Stays in Aggregating on error; a resume records the outcome again
        let report = self.learning.record_outcome(&outcome).await?;
        debug!(
            task_id = %checkpoint.task_id(),
            pattern_type = %report.pattern_type,
            duplicate = report.duplicate,
            "outcome recorded"
        );

        match &result.failure {
            None => self.transition(checkpoint, WorkflowState::Done).await,
            Some(failure) => self.fail(checkpoint, failure.to_string()).await,
        }
    }

    async fn fail(&self, checkpoint: &mut Checkpoint, message: String) -> Result<()> {
        warn!(task_id = %checkpoint.task_id(), error = %message, "task failed");
        checkpoint.error = Some(message);
        self.transition(checkpoint, WorkflowState::Failed).await
    }

    /// Commit `to`, then announce it.
    async fn transition(&self, checkpoint: &mut Checkpoint, to: WorkflowState) -> Result<()> {
        let from = checkpoint.state;
        from.check_transition(to)?;
        checkpoint.task.advance(to.task_status())?;
        checkpoint.state = to;
        checkpoint.touch();
        self.checkpoints.save(checkpoint).await?;

        let task_id = checkpoint.task_id();
        self.events
            .publish(OrchestrationEvent::TaskStateChanged { task_id, from, to });
        info!(task_id = %task_id, from = %from, to = %to, version = checkpoint.version, "workflow state changed");

        if matches!(to, WorkflowState::Aggregating) || to.is_terminal() {
            self.coordinator.messages().clear_task(task_id).await;
        }
        if to.is_terminal() {
            self.approvals.forget(task_id).await;
        }
        Ok(())
    }
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("config", &self.config)
            .field("running", &self.running.len())
            .finish()
    }
}
