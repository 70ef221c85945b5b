//! Conductor Core - Orchestration Engine
//!
//! This crate provides the memory-augmented orchestration logic of Conductor,
//! including:
//! - Planner: Decomposing a task into a DAG of role-assigned subtasks, using
//!   the outcomes of similar past tasks
//! - Context: Retrieving, scoring, filtering and caching memory per role
//! - Coordinator: Running subtasks on a bounded worker pool with isolated
//!   workspaces, retries and cancellation
//! - Workflow: Checkpointed task lifecycle with a human approval gate
//! - Learning: Turning outcomes into Pattern and Error memory
//! - Utils: Retry logic with exponential backoff

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod agents;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod event_bus;
pub mod learning;
pub mod planner;
pub mod provisioner;
pub mod task;
pub mod utils;
pub mod workflow;

pub use agents::{Agent, AgentError, AgentRegistry, AgentRole};
pub use context::{
    ContextBundle, ContextConfig, ContextEngine, ContextRequest, ContextScope, ScoredRecord,
};
pub use coordinator::{Coordinator, CoordinatorConfig, CoordinatorStats, MessageBus};
pub use error::{format_error_for_cli, Error, ReasonCode, Result, UserFriendlyError};
pub use event_bus::{EventBus, OrchestrationEvent};
pub use learning::{
    LearningConfig, LearningEngine, LearningReport, LearningStats, Outcome, PatternType,
};
pub use planner::{DecompositionResult, PlannerConfig, Strategy, TaskPlanner};
pub use provisioner::{
    IsolationProvisioner, PooledProvisioner, ProvisionError, ProvisionerConfig, ProvisionerKind,
    TempDirProvisioner, WorkspaceHandle, WorkspaceLease,
};
pub use task::{
    Complexity, Subtask, SubtaskId, SubtaskOutput, SubtaskResult, SubtaskStatus, Task,
    TaskFailure, TaskId, TaskResult, TaskStatus,
};
pub use utils::{retry_with_backoff, RetryConfig};
pub use workflow::{
    ApprovalDecision, Checkpoint, CheckpointStore, CheckpointSummary, InMemoryCheckpointStore,
    SqliteCheckpointStore, WorkflowConfig, WorkflowEngine, WorkflowEstimate, WorkflowState,
};
