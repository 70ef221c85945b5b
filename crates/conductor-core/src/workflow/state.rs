//! Workflow states and the transition graph.

use crate::error::{Error, Result};
use crate::task::TaskStatus;
use serde::{Deserialize, Serialize};

/// Where a task is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    /// Submitted, not yet planned
    Created,
    /// The planner is decomposing the task
    Planning,
    /// A plan exists; nothing has been dispatched
    ReadyForDispatch,
    /// Waiting for a human decision
    AwaitingApproval,
    /// Subtasks are being coordinated
    Executing,
    /// Results are being rolled up and learned from
    Aggregating,
    /// Finished successfully
    Done,
    /// Finished with a failure (absorbing except for an explicit retry)
    Failed,
}

impl WorkflowState {
    /// Every state, in lifecycle order.
    pub const ALL: [WorkflowState; 8] = [
        Self::Created,
        Self::Planning,
        Self::ReadyForDispatch,
        Self::AwaitingApproval,
        Self::Executing,
        Self::Aggregating,
        Self::Done,
        Self::Failed,
    ];

    /// States reachable from `self` through a normal transition.
    #[must_use]
    pub fn successors(self) -> &'static [WorkflowState] {
        match self {
            Self::Created => &[Self::Planning, Self::Failed],
            // Back to Created when the scope is ambiguous
            Self::Planning => &[Self::ReadyForDispatch, Self::Created, Self::Failed],
            Self::ReadyForDispatch => &[Self::AwaitingApproval, Self::Executing, Self::Failed],
            Self::AwaitingApproval => &[Self::Executing, Self::Failed],
            Self::Executing => &[Self::Aggregating, Self::Failed],
            Self::Aggregating => &[Self::Done, Self::Failed],
            Self::Done | Self::Failed => &[],
        }
    }

    /// Whether `self -> next` is a normal transition.
    #[must_use]
    pub fn can_transition_to(self, next: WorkflowState) -> bool {
        self.successors().contains(&next)
    }

    /// Validate `self -> next`.
    pub fn check_transition(self, next: WorkflowState) -> Result<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    /// Whether no normal transition leaves this state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether an approval decision may still be given.
    #[must_use]
    pub fn accepts_approval(self) -> bool {
        matches!(
            self,
            Self::Created | Self::Planning | Self::ReadyForDispatch | Self::AwaitingApproval
        )
    }

    /// The task status shown for this state.
    #[must_use]
    pub fn task_status(self) -> TaskStatus {
        match self {
            Self::Created | Self::Planning => TaskStatus::Pending,
            Self::ReadyForDispatch => TaskStatus::Decomposed,
            Self::AwaitingApproval => TaskStatus::AwaitingApproval,
            Self::Executing | Self::Aggregating => TaskStatus::Running,
            Self::Done => TaskStatus::Done,
            Self::Failed => TaskStatus::Failed,
        }
    }

    /// Stable snake_case name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Planning => "planning",
            Self::ReadyForDispatch => "ready_for_dispatch",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Executing => "executing",
            Self::Aggregating => "aggregating",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkflowState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| Error::Checkpoint(format!("unknown workflow state '{s}'")))
    }
}
