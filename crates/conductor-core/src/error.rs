//! Error types for conductor-core
//!
//! This module provides the crate error type, the reason codes attached to
//! surfaced subtask failures, and user-friendly error formatting.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Why a subtask ended up terminally failed.
///
/// Travels with every surfaced failure so the learning engine can classify it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// A dependency failed; never retried
    DependencyFailed,
    /// The agent returned an error after exhausting its retry budget
    AgentError,
    /// Cancelled by the caller
    Cancelled,
    /// Stopped waiting for the agent past the deadline
    Timeout,
    /// No workspace could be leased before the task was abandoned
    NoCapacity,
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::DependencyFailed => "dependency_failed",
            Self::AgentError => "agent_error",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
            Self::NoCapacity => "no_capacity",
        };
        f.write_str(s)
    }
}

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// The planner could not decompose the task
    #[error("ambiguous scope: {0}")]
    AmbiguousScope(String),

    /// The isolation provisioner has no free workspace
    #[error("no workspace capacity")]
    NoCapacity,

    /// A dependency of the subtask failed
    #[error("subtask {subtask_id} skipped: dependency {dependency_id} failed")]
    DependencyFailed {
        /// Subtask that was skipped
        subtask_id: Uuid,
        /// First dependency found failed
        dependency_id: Uuid,
    },

    /// An agent failed to execute a subtask
    #[error("agent error in subtask {subtask_id}: {message}")]
    Agent {
        /// Failing subtask
        subtask_id: Uuid,
        /// Agent-provided message
        message: String,
    },

    /// Work was cancelled
    #[error("cancelled")]
    Cancelled,

    /// A human rejected the task, or no decision arrived in time
    #[error("approval rejected for task {0}")]
    ApprovalRejected(Uuid),

    /// A workflow transition that the state graph does not allow
    #[error("invalid transition {from} -> {to}")]
    InvalidTransition {
        /// Current state
        from: String,
        /// Requested state
        to: String,
    },

    /// Task or checkpoint not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Checkpoint persistence failed
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// Memory store error
    #[error("memory error: {0}")]
    Memory(#[from] conductor_memory::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal error (serialization, join failures, etc.)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether retrying the same call may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NoCapacity => true,
            Self::Memory(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Reason code for errors that terminate a subtask.
    #[must_use]
    pub fn reason_code(&self) -> Option<ReasonCode> {
        match self {
            Self::DependencyFailed { .. } => Some(ReasonCode::DependencyFailed),
            Self::Agent { .. } => Some(ReasonCode::AgentError),
            Self::Cancelled => Some(ReasonCode::Cancelled),
            Self::NoCapacity => Some(ReasonCode::NoCapacity),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(format!("serialization: {e}"))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Trait for user-friendly error messages
///
/// Provides human-readable error messages and suggestions for fixing.
pub trait UserFriendlyError {
    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get a suggestion for how to fix the error
    fn suggestion(&self) -> Option<String>;
}

impl UserFriendlyError for Error {
    fn user_message(&self) -> String {
        match self {
            Error::AmbiguousScope(msg) => format!("Could not break the task down: {msg}"),
            Error::NoCapacity => "All workspaces are busy.".to_string(),
            Error::DependencyFailed { dependency_id, .. } => {
                format!("A prerequisite step ({dependency_id}) failed.")
            }
            Error::Agent { message, .. } => format!("An agent failed: {message}"),
            Error::Cancelled => "The task was cancelled.".to_string(),
            Error::ApprovalRejected(id) => format!("Task {id} was not approved."),
            Error::InvalidTransition { from, to } => {
                format!("Task cannot move from '{from}' to '{to}'.")
            }
            Error::NotFound(what) => format!("Nothing found for {what}."),
            Error::Checkpoint(msg) => format!("Could not save progress: {msg}"),
            Error::Memory(e) => format!("Memory store problem: {e}"),
            Error::Configuration(msg) => format!("Configuration error: {msg}"),
            Error::Internal(msg) => format!("Internal error: {msg}"),
        }
    }

    fn suggestion(&self) -> Option<String> {
        match self {
            Error::AmbiguousScope(_) => Some(
                "Describe the task with a concrete action and target, e.g. \"add pagination to the orders API\"."
                    .to_string(),
            ),
            Error::NoCapacity => {
                Some("Raise provisioner.capacity or wait for running tasks to finish.".to_string())
            }
            Error::ApprovalRejected(id) => Some(format!(
                "Re-run with `conductor resume {id}` after the task is approved, or pass --auto-approve."
            )),
            Error::Checkpoint(_) => {
                Some("Check that storage.data_dir is writable.".to_string())
            }
            Error::Configuration(_) => {
                Some("Check config/default.toml and CONDUCTOR_* environment variables.".to_string())
            }
            _ => None,
        }
    }
}

/// Format an error for display in the CLI
pub fn format_error_for_cli(error: &Error) -> String {
    let mut output = error.user_message();
    if let Some(suggestion) = error.suggestion() {
        output.push_str("\n\n");
        output.push_str(&suggestion);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes() {
        let err = Error::DependencyFailed {
            subtask_id: Uuid::nil(),
            dependency_id: Uuid::nil(),
        };
        assert_eq!(err.reason_code(), Some(ReasonCode::DependencyFailed));
        assert_eq!(Error::Cancelled.reason_code(), Some(ReasonCode::Cancelled));
        assert_eq!(Error::Internal("x".into()).reason_code(), None);
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::NoCapacity.is_transient());
        assert!(Error::Memory(conductor_memory::Error::Unavailable("busy".into())).is_transient());
        assert!(!Error::Cancelled.is_transient());
    }

    #[test]
    fn test_reason_code_serialization() {
        let json = serde_json::to_string(&ReasonCode::DependencyFailed).unwrap();
        assert_eq!(json, "\"dependency_failed\"");
        assert_eq!(ReasonCode::Timeout.to_string(), "timeout");
    }

    #[test]
    fn test_format_error_for_cli() {
        let text = format_error_for_cli(&Error::AmbiguousScope("too short".into()));
        assert!(text.contains("too short"));
        assert!(text.contains("concrete action"));
    }
}
