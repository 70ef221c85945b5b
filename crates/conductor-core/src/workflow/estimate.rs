//! Cost and duration estimates used for the approval decision.

use crate::planner::DecompositionResult;
use crate::task::Complexity;
use serde::{Deserialize, Serialize};

/// Estimated cost of one subtask, in USD.
#[must_use]
pub fn subtask_cost_usd(complexity: Complexity) -> f64 {
    match complexity {
        Complexity::Trivial | Complexity::Simple => 0.01,
        Complexity::Medium => 0.05,
        Complexity::Complex | Complexity::Epic => 0.15,
    }
}

/// Estimated duration of one subtask, in minutes.
#[must_use]
pub fn subtask_minutes(complexity: Complexity) -> u64 {
    match complexity {
        Complexity::Trivial | Complexity::Simple => 5,
        Complexity::Medium => 15,
        Complexity::Complex | Complexity::Epic => 45,
    }
}

/// Plan summary shown before dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEstimate {
    /// Subtasks in the plan
    pub subtasks: usize,
    /// Estimated cost in USD
    pub cost_usd: f64,
    /// Estimated duration in minutes
    pub duration_minutes: u64,
    /// Whether a human must approve before dispatch
    pub requires_approval: bool,
    /// Why approval is required
    pub approval_reasons: Vec<String>,
}

impl WorkflowEstimate {
    /// Estimate `plan`, requiring approval when the planner asked for it or
    /// the cost reaches `cost_threshold_usd`.
    #[must_use]
    pub fn for_plan(plan: &DecompositionResult, cost_threshold_usd: f64) -> Self {
        let level = plan.complexity.level;
        let subtasks = plan.subtasks.len();
        let cost_usd = subtask_cost_usd(level) * subtasks as f64;
        let duration_minutes = subtask_minutes(level) * subtasks as u64;

        let mut approval_reasons = plan.approval_reasons.clone();
        if cost_usd >= cost_threshold_usd {
            approval_reasons.push(format!(
                "estimated cost ${cost_usd:.2} reaches the ${cost_threshold_usd:.2} threshold"
            ));
        }

        Self {
            subtasks,
            cost_usd,
            duration_minutes,
            requires_approval: plan.requires_approval || !approval_reasons.is_empty(),
            approval_reasons,
        }
    }

    /// Estimated duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        self.duration_minutes * 60_000
    }
}
