//! Checkpoints - the durable record of a workflow
//!
//! A checkpoint is written after every state transition and after every
//! subtask result, before any side effect of the next step begins.

use super::estimate::WorkflowEstimate;
use super::state::WorkflowState;
use crate::planner::DecompositionResult;
use crate::task::{SubtaskResult, Task, TaskId, TaskResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Checkpoint store errors
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// SQLite database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Checkpoint could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A save carried an older version than the stored one
    #[error("stale checkpoint for task {task_id}: version {version} <= stored {stored}")]
    Stale {
        /// Task
        task_id: TaskId,
        /// Version being saved
        version: u64,
        /// Version already stored
        stored: u64,
    },

    /// Filesystem error
    #[error("io error: {0}")]
    Io(String),
}

impl From<CheckpointError> for crate::Error {
    fn from(e: CheckpointError) -> Self {
        Self::Checkpoint(e.to_string())
    }
}

/// Everything needed to resume a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Task as last saved
    pub task: Task,
    /// Committed state
    pub state: WorkflowState,
    /// Plan, once planning finished
    pub plan: Option<DecompositionResult>,
    /// Cost and duration estimate of the plan
    pub estimate: Option<WorkflowEstimate>,
    /// Subtask results received so far
    pub results: Vec<SubtaskResult>,
    /// Aggregated result, once execution finished
    pub result: Option<TaskResult>,
    /// Idempotency key for the learning engine
    pub outcome_id: Option<Uuid>,
    /// Last failure message, if the workflow failed outside execution
    pub error: Option<String>,
    /// Last save time
    pub updated_at: DateTime<Utc>,
    /// Increases by one on every save
    pub version: u64,
}

impl Checkpoint {
    /// First checkpoint of a submitted task.
    #[must_use]
    pub fn new(task: Task) -> Self {
        Self {
            task,
            state: WorkflowState::Created,
            plan: None,
            estimate: None,
            results: Vec::new(),
            result: None,
            outcome_id: None,
            error: None,
            updated_at: Utc::now(),
            version: 0,
        }
    }

    /// Task id.
    #[must_use]
    pub fn task_id(&self) -> TaskId {
        self.task.id
    }

    /// Record a subtask result, replacing an earlier one for the same subtask.
    pub fn record_result(&mut self, result: SubtaskResult) {
        match self
            .results
            .iter_mut()
            .find(|r| r.subtask_id == result.subtask_id)
        {
            Some(existing) => *existing = result,
            None => self.results.push(result),
        }
    }

    /// Results that succeeded and must not run again.
    #[must_use]
    pub fn completed(&self) -> Vec<SubtaskResult> {
        self.results
            .iter()
            .filter(|r| r.is_success())
            .cloned()
            .collect()
    }

    /// Bump the version for the next save.
    pub fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }

    /// Short listing entry.
    #[must_use]
    pub fn summary(&self) -> CheckpointSummary {
        CheckpointSummary {
            task_id: self.task.id,
            description: self.task.description.clone(),
            state: self.state,
            version: self.version,
            updated_at: self.updated_at,
        }
    }
}

/// Listing entry for a stored checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    /// Task
    pub task_id: TaskId,
    /// Task description
    pub description: String,
    /// Committed state
    pub state: WorkflowState,
    /// Version
    pub version: u64,
    /// Last save time
    pub updated_at: DateTime<Utc>,
}

/// Durable key-value log of checkpoints, keyed by task id.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Save a checkpoint. Saving an older version than the stored one fails.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    /// Load the checkpoint of a task.
    async fn load(&self, task_id: TaskId) -> Result<Option<Checkpoint>, CheckpointError>;

    /// All checkpoints, most recently updated first.
    async fn list(&self) -> Result<Vec<CheckpointSummary>, CheckpointError>;

    /// Delete a checkpoint. Returns whether one existed.
    async fn delete(&self, task_id: TaskId) -> Result<bool, CheckpointError>;

    /// Delete terminal checkpoints not updated for `days` days.
    async fn cleanup_older_than(&self, days: u32) -> Result<usize, CheckpointError>;
}

/// Process-local checkpoint store.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: RwLock<HashMap<TaskId, Checkpoint>>,
}

impl InMemoryCheckpointStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let mut checkpoints = self.checkpoints.write().await;
        if let Some(stored) = checkpoints.get(&checkpoint.task_id()) {
            if stored.version >= checkpoint.version {
                return Err(CheckpointError::Stale {
                    task_id: checkpoint.task_id(),
                    version: checkpoint.version,
                    stored: stored.version,
                });
            }
        }
        checkpoints.insert(checkpoint.task_id(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, task_id: TaskId) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.checkpoints.read().await.get(&task_id).cloned())
    }

    async fn list(&self) -> Result<Vec<CheckpointSummary>, CheckpointError> {
        let mut summaries: Vec<_> = self
            .checkpoints
            .read()
            .await
            .values()
            .map(Checkpoint::summary)
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn delete(&self, task_id: TaskId) -> Result<bool, CheckpointError> {
        Ok(self.checkpoints.write().await.remove(&task_id).is_some())
    }

    async fn cleanup_older_than(&self, days: u32) -> Result<usize, CheckpointError> {
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        let mut checkpoints = self.checkpoints.write().await;
        let before = checkpoints.len();
        checkpoints.retain(|_, cp| !(cp.state.is_terminal() && cp.updated_at < cutoff));
        Ok(before - checkpoints.len())
    }
}
