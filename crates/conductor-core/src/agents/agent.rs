use super::AgentRole;
use crate::context::ContextBundle;
use crate::provisioner::WorkspaceHandle;
use crate::task::{Subtask, SubtaskOutput};
use async_trait::async_trait;
use thiserror::Error;

/// Errors an agent may return from [`Agent::execute`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AgentError {
    /// Execution failed; the coordinator may retry
    #[error("execution failed: {0}")]
    Execution(String),

    /// Execution failed in a way retrying cannot fix
    #[error("fatal: {0}")]
    Fatal(String),

    /// No registered agent declares a required capability
    #[error("no agent provides capability '{0}'")]
    MissingCapability(String),
}

impl AgentError {
    /// Whether the coordinator should spend retry budget on this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Execution(_))
    }
}

/// A unit of work implementing one role's execution capability.
///
/// Implementations receive the prepared context and an exclusively leased
/// workspace. They should be idempotent per subtask: after a crash the
/// workflow may run a subtask again.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Role this agent fulfils.
    fn role(&self) -> AgentRole;

    /// Capabilities offered; defaults to the role's declared set.
    fn capabilities(&self) -> Vec<String> {
        self.role()
            .capabilities()
            .iter()
            .map(|c| (*c).to_string())
            .collect()
    }

    /// Execute a subtask.
    async fn execute(
        &self,
        subtask: &Subtask,
        context: &ContextBundle,
        workspace: &WorkspaceHandle,
    ) -> Result<SubtaskOutput, AgentError>;
}
