use crate::agents::AgentRole;
use crate::error::ReasonCode;
use crate::task::{SubtaskId, TaskId};
use crate::workflow::WorkflowState;
use serde::Serialize;
use uuid::Uuid;

/// Events emitted while tasks move through the system.
///
/// Payloads carry identifiers and codes only; full results are read from the
/// workflow checkpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestrationEvent {
    /// A task was submitted
    TaskCreated {
        /// Task identifier
        task_id: TaskId,
    },
    /// The workflow moved to a new state (after the checkpoint committed)
    TaskStateChanged {
        /// Task identifier
        task_id: TaskId,
        /// Previous state
        from: WorkflowState,
        /// New state
        to: WorkflowState,
    },
    /// A subtask entered the ready queue
    SubtaskQueued {
        /// Task identifier
        task_id: TaskId,
        /// Subtask identifier
        subtask_id: SubtaskId,
    },
    /// A subtask started executing
    SubtaskStarted {
        /// Task identifier
        task_id: TaskId,
        /// Subtask identifier
        subtask_id: SubtaskId,
        /// Role executing it
        role: AgentRole,
        /// Attempt number (1-based)
        attempt: u32,
    },
    /// A subtask succeeded
    SubtaskCompleted {
        /// Task identifier
        task_id: TaskId,
        /// Subtask identifier
        subtask_id: SubtaskId,
        /// Execution time
        duration_ms: u64,
    },
    /// A subtask failed terminally
    SubtaskFailed {
        /// Task identifier
        task_id: TaskId,
        /// Subtask identifier
        subtask_id: SubtaskId,
        /// Reason code
        reason: ReasonCode,
    },
    /// A workspace lease ended
    WorkspaceReleased {
        /// Task identifier
        task_id: TaskId,
        /// Subtask identifier
        subtask_id: SubtaskId,
    },
    /// A task is waiting for a human decision
    ApprovalRequired {
        /// Task identifier
        task_id: TaskId,
        /// Estimated cost in USD
        estimated_cost_usd: f64,
    },
    /// An agent sent a coordination message
    MessageSent {
        /// Task identifier
        task_id: TaskId,
        /// Sender
        from: AgentRole,
        /// Receiver
        to: AgentRole,
        /// Message identifier
        message_id: Uuid,
    },
    /// The learning engine created or reinforced a pattern
    PatternLearned {
        /// Task whose outcome produced it
        task_id: TaskId,
        /// Pattern record
        record_id: Uuid,
        /// Whether an existing pattern was reinforced
        reinforced: bool,
    },
}

impl OrchestrationEvent {
    /// Task the event belongs to.
    #[must_use]
    pub fn task_id(&self) -> TaskId {
        match self {
            Self::TaskCreated { task_id }
            | Self::TaskStateChanged { task_id, .. }
            | Self::SubtaskQueued { task_id, .. }
            | Self::SubtaskStarted { task_id, .. }
            | Self::SubtaskCompleted { task_id, .. }
            | Self::SubtaskFailed { task_id, .. }
            | Self::WorkspaceReleased { task_id, .. }
            | Self::ApprovalRequired { task_id, .. }
            | Self::MessageSent { task_id, .. }
            | Self::PatternLearned { task_id, .. } => *task_id,
        }
    }

    /// Snake-case event name.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TaskCreated { .. } => "task_created",
            Self::TaskStateChanged { .. } => "task_state_changed",
            Self::SubtaskQueued { .. } => "subtask_queued",
            Self::SubtaskStarted { .. } => "subtask_started",
            Self::SubtaskCompleted { .. } => "subtask_completed",
            Self::SubtaskFailed { .. } => "subtask_failed",
            Self::WorkspaceReleased { .. } => "workspace_released",
            Self::ApprovalRequired { .. } => "approval_required",
            Self::MessageSent { .. } => "message_sent",
            Self::PatternLearned { .. } => "pattern_learned",
        }
    }
}
