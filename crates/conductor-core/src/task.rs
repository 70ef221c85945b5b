//! Task and subtask data model.
//!
//! A [`Task`] is owned by the workflow for its whole lifetime and only
//! changes status through [`Task::advance`] / [`Task::retry`]. Subtasks are
//! produced by the planner and executed by the coordinator.

use crate::agents::AgentRole;
use crate::error::{Error, ReasonCode, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Task identifier
pub type TaskId = Uuid;

/// Subtask identifier
pub type SubtaskId = Uuid;

/// Lowest task/subtask priority.
pub const MIN_PRIORITY: u8 = 1;
/// Highest task/subtask priority.
pub const MAX_PRIORITY: u8 = 10;

/// Estimated size of a piece of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    /// One obvious step
    Trivial,
    /// A few hours of work
    Simple,
    /// A feature-sized change
    Medium,
    /// Cross-cutting design work
    Complex,
    /// Platform-level effort
    Epic,
}

impl Complexity {
    /// All levels from smallest to largest.
    pub const ALL: [Complexity; 5] = [
        Self::Trivial,
        Self::Simple,
        Self::Medium,
        Self::Complex,
        Self::Epic,
    ];

    /// Stable snake_case name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trivial => "trivial",
            Self::Simple => "simple",
            Self::Medium => "medium",
            Self::Complex => "complex",
            Self::Epic => "epic",
        }
    }
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Accepted, not yet decomposed
    Pending,
    /// Subtasks produced
    Decomposed,
    /// Waiting for a human decision
    AwaitingApproval,
    /// Subtasks dispatched
    Running,
    /// Finished successfully
    Done,
    /// Finished with a failure
    Failed,
}

impl TaskStatus {
    /// Position in the forward-only order. `Done` and `Failed` share the end.
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Decomposed => 1,
            Self::AwaitingApproval => 2,
            Self::Running => 3,
            Self::Done | Self::Failed => 4,
        }
    }

    /// Whether the status is final.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Decomposed => "decomposed",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A unit of work submitted to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task ID
    pub id: TaskId,
    /// Natural-language description
    pub description: String,
    /// Priority 1 (lowest) to 10 (highest)
    pub priority: u8,
    /// Planner estimate, once planned
    #[serde(default)]
    pub complexity: Option<Complexity>,
    /// Current status
    pub status: TaskStatus,
    /// Subtasks produced by the planner
    #[serde(default)]
    pub subtasks: Vec<SubtaskId>,
    /// Project the task belongs to
    #[serde(default)]
    pub project: Option<String>,
    /// Free-form tags used for similarity and learning
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a pending task with priority 5.
    pub fn new(description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            priority: 5,
            complexity: None,
            status: TaskStatus::Pending,
            subtasks: Vec::new(),
            project: None,
            tags: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the priority (clamped to 1..=10).
    #[must_use]
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(MIN_PRIORITY, MAX_PRIORITY);
        self
    }

    /// Set the project.
    #[must_use]
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Add tags.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Move forward to `next`. Status never moves backwards.
    pub fn advance(&mut self, next: TaskStatus) -> Result<()> {
        if self.status == next {
            return Ok(());
        }
        if self.status.is_terminal() || next.rank() < self.status.rank() {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Explicit retry: the only backwards move, `failed -> pending`.
    pub fn retry(&mut self) -> Result<()> {
        if self.status != TaskStatus::Failed {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: TaskStatus::Pending.to_string(),
            });
        }
        self.status = TaskStatus::Pending;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Subtask lifecycle status.
///
/// `queued → context_ready → workspace_acquired → executing → succeeded|failed`.
/// Workspace release happens after the terminal status is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    /// Waiting for dependencies or a worker slot
    Queued,
    /// Context bundle prepared
    ContextReady,
    /// Workspace leased
    WorkspaceAcquired,
    /// Agent running
    Executing,
    /// Finished successfully
    Succeeded,
    /// Finished with a failure
    Failed,
}

impl SubtaskStatus {
    /// Whether the status is final.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for SubtaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::ContextReady => "context_ready",
            Self::WorkspaceAcquired => "workspace_acquired",
            Self::Executing => "executing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One decomposed unit of work assigned to a single role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    /// Unique subtask ID
    pub id: SubtaskId,
    /// Parent task
    pub task_id: TaskId,
    /// Short title
    pub title: String,
    /// What the agent should do
    pub description: String,
    /// Assigned role
    pub role: AgentRole,
    /// Capabilities the agent must declare
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    /// Subtasks that must succeed first
    #[serde(default)]
    pub dependencies: BTreeSet<SubtaskId>,
    /// Priority 1 (lowest) to 10 (highest)
    pub priority: u8,
    /// Planner estimate in hours
    pub estimated_hours: f64,
    /// Current status
    pub status: SubtaskStatus,
    /// Result once terminal
    #[serde(default)]
    pub result: Option<SubtaskResult>,
    /// Retries consumed
    #[serde(default)]
    pub retry_count: u32,
}

impl Subtask {
    /// Create a queued subtask.
    pub fn new(
        task_id: TaskId,
        title: impl Into<String>,
        description: impl Into<String>,
        role: AgentRole,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            title: title.into(),
            description: description.into(),
            role,
            capabilities: BTreeSet::new(),
            dependencies: BTreeSet::new(),
            priority: 5,
            estimated_hours: 1.0,
            status: SubtaskStatus::Queued,
            result: None,
            retry_count: 0,
        }
    }

    /// Add a dependency.
    #[must_use]
    pub fn depends_on(mut self, id: SubtaskId) -> Self {
        self.dependencies.insert(id);
        self
    }

    /// Set the priority (clamped to 1..=10).
    #[must_use]
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(MIN_PRIORITY, MAX_PRIORITY);
        self
    }

    /// Require a capability.
    #[must_use]
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    /// Set the estimate.
    #[must_use]
    pub fn with_estimate(mut self, hours: f64) -> Self {
        self.estimated_hours = hours.max(0.0);
        self
    }
}

/// Structured output returned by an agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubtaskOutput {
    /// Human-readable summary
    pub summary: String,
    /// Structured payload
    #[serde(default)]
    pub data: serde_json::Value,
    /// Tags describing what was done (fed to the learning engine)
    #[serde(default)]
    pub tags: Vec<String>,
}

impl SubtaskOutput {
    /// Output with only a summary.
    pub fn summary(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            data: serde_json::Value::Null,
            tags: Vec::new(),
        }
    }
}

/// Failure details attached to a failed subtask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureInfo {
    /// Reason code
    pub reason: ReasonCode,
    /// Message
    pub message: String,
}

/// Terminal result of a subtask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskResult {
    /// Subtask this result belongs to
    pub subtask_id: SubtaskId,
    /// Role that ran it
    pub role: AgentRole,
    /// Output when succeeded
    #[serde(default)]
    pub output: Option<SubtaskOutput>,
    /// Failure when failed
    #[serde(default)]
    pub failure: Option<FailureInfo>,
    /// Attempts made (0 when never started)
    pub attempts: u32,
    /// Wall time spent executing
    pub duration_ms: u64,
    /// When the result was recorded
    pub finished_at: DateTime<Utc>,
}

impl SubtaskResult {
    /// Successful result.
    #[must_use]
    pub fn succeeded(subtask: &Subtask, output: SubtaskOutput, attempts: u32, duration_ms: u64) -> Self {
        Self {
            subtask_id: subtask.id,
            role: subtask.role,
            output: Some(output),
            failure: None,
            attempts,
            duration_ms,
            finished_at: Utc::now(),
        }
    }

    /// Failed result.
    pub fn failed(
        subtask: &Subtask,
        reason: ReasonCode,
        message: impl Into<String>,
        attempts: u32,
        duration_ms: u64,
    ) -> Self {
        Self {
            subtask_id: subtask.id,
            role: subtask.role,
            output: None,
            failure: Some(FailureInfo {
                reason,
                message: message.into(),
            }),
            attempts,
            duration_ms,
            finished_at: Utc::now(),
        }
    }

    /// Whether the subtask succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Failure reason, if failed.
    #[must_use]
    pub fn reason(&self) -> Option<ReasonCode> {
        self.failure.as_ref().map(|f| f.reason)
    }
}

/// Rollup shown to users when a task fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    /// First subtask to fail terminally
    pub subtask_id: SubtaskId,
    /// Its reason code
    pub reason: ReasonCode,
    /// Its message
    pub message: String,
    /// Other subtasks that also failed
    pub sibling_failures: usize,
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "subtask {} failed ({}): {}",
            self.subtask_id, self.reason, self.message
        )?;
        if self.sibling_failures > 0 {
            write!(f, "; {} more subtask(s) failed as a result", self.sibling_failures)?;
        }
        Ok(())
    }
}

/// Aggregated result of coordinating every subtask of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// Task ID
    pub task_id: TaskId,
    /// Results in completion order
    pub subtask_results: Vec<SubtaskResult>,
    /// Failure rollup, `None` when every subtask succeeded
    pub failure: Option<TaskFailure>,
    /// Wall time of coordination
    pub duration_ms: u64,
}

impl TaskResult {
    /// Build a result, deriving the failure rollup from completion order.
    #[must_use]
    pub fn from_results(task_id: TaskId, subtask_results: Vec<SubtaskResult>, duration_ms: u64) -> Self {
        let mut failed = subtask_results.iter().filter(|r| !r.is_success());
        let failure = failed.next().and_then(|first| {
            first.failure.as_ref().map(|info| TaskFailure {
                subtask_id: first.subtask_id,
                reason: info.reason,
                message: info.message.clone(),
                sibling_failures: failed.count(),
            })
        });
        Self {
            task_id,
            subtask_results,
            failure,
            duration_ms,
        }
    }

    /// Whether every subtask succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Result for a given subtask.
    #[must_use]
    pub fn result_for(&self, id: SubtaskId) -> Option<&SubtaskResult> {
        self.subtask_results.iter().find(|r| r.subtask_id == id)
    }

    /// Distinct roles that took part.
    #[must_use]
    pub fn roles(&self) -> BTreeSet<AgentRole> {
        self.subtask_results.iter().map(|r| r.role).collect()
    }
}

#[cfg(test)]
mod tests;
