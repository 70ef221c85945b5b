//! Task Decomposition Planner
//!
//! Turns a [`Task`] into a DAG of [`Subtask`]s:
//!
//! 1. estimate complexity from keyword, scope, dependency and history factors
//! 2. find similar past tasks among recorded outcomes
//! 3. select a decomposition strategy from keyword fit, complexity fit and
//!    the strategies' success rates on similar tasks
//! 4. expand the complexity template under the strategy's dependency shape
//!
//! [`TaskPlanner::plan`] is a pure function of the task and a memory
//! snapshot. [`TaskPlanner::plan_with_memory`] takes that snapshot through
//! the context engine.

pub mod complexity;
pub mod dag;
pub mod similarity;
pub mod strategy;
pub mod templates;
pub mod text;

pub use complexity::ComplexityEstimate;
pub use similarity::SimilarTask;
pub use strategy::{Strategy, StrategyScore};

use crate::agents::AgentRole;
use crate::context::ContextEngine;
use crate::error::Error;
use crate::learning::keys;
use crate::task::{Complexity, Subtask, SubtaskId, Task, TaskId, MAX_PRIORITY, MIN_PRIORITY};
use conductor_memory::{MemoryCategory, MemoryFilter, MemoryRecord};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;
use tracing::{debug, info};

/// Planner failures.
#[derive(Debug, Clone, PartialEq, ThisError)]
pub enum PlanError {
    /// The description cannot be decomposed
    #[error("ambiguous scope: {0}")]
    AmbiguousScope(String),

    /// The produced dependencies contain a cycle
    #[error("dependency cycle among {} subtask(s)", .0.len())]
    Cycle(Vec<SubtaskId>),

    /// A dependency points outside the plan
    #[error("subtask {subtask_id} depends on unknown subtask {dependency_id}")]
    UnknownDependency {
        /// Subtask with the dangling edge
        subtask_id: SubtaskId,
        /// Missing dependency
        dependency_id: SubtaskId,
    },
}

impl From<PlanError> for Error {
    fn from(e: PlanError) -> Self {
        match e {
            PlanError::AmbiguousScope(msg) => Error::AmbiguousScope(msg),
            other => Error::Internal(other.to_string()),
        }
    }
}

/// Planner configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Minimum similarity for a past task to count
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Similar tasks considered
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Outcome records fetched per plan
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Samples at which a strategy's history counts fully
    #[serde(default = "default_confidence_samples")]
    pub confidence_samples: usize,
    /// Meaningful words a description needs
    #[serde(default = "default_min_meaningful_words")]
    pub min_meaningful_words: usize,
    /// Description words that force human approval
    #[serde(default = "default_approval_keywords")]
    pub approval_keywords: Vec<String>,
}

fn default_similarity_threshold() -> f64 {
    0.3
}

fn default_top_k() -> usize {
    5
}

fn default_history_limit() -> usize {
    200
}

fn default_confidence_samples() -> usize {
    5
}

fn default_min_meaningful_words() -> usize {
    2
}

fn default_approval_keywords() -> Vec<String> {
    ["security", "auth", "permission", "access", "password", "credential"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            top_k: default_top_k(),
            history_limit: default_history_limit(),
            confidence_samples: default_confidence_samples(),
            min_meaningful_words: default_min_meaningful_words(),
            approval_keywords: default_approval_keywords(),
        }
    }
}

impl PlannerConfig {
    /// Set the similarity threshold.
    #[must_use]
    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    /// Set how many similar tasks are considered.
    #[must_use]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }
}

/// Output of the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecompositionResult {
    /// Planned task
    pub task_id: TaskId,
    /// Complexity estimate
    pub complexity: ComplexityEstimate,
    /// Chosen strategy
    pub strategy: Strategy,
    /// Every strategy's score
    pub strategy_scores: Vec<StrategyScore>,
    /// Subtasks in topological order
    pub subtasks: Vec<Subtask>,
    /// Similar past tasks that informed the plan
    pub similar_tasks: Vec<SimilarTask>,
    /// A human must approve before execution
    pub requires_approval: bool,
    /// Why approval is required
    pub approval_reasons: Vec<String>,
    /// Sum of subtask estimates
    pub total_hours: f64,
    /// Planner confidence in `0.0..=1.0`
    pub confidence: f64,
}

impl DecompositionResult {
    /// Subtask by id.
    #[must_use]
    pub fn subtask(&self, id: SubtaskId) -> Option<&Subtask> {
        self.subtasks.iter().find(|s| s.id == id)
    }

    /// Roles involved, in roster order.
    #[must_use]
    pub fn roles(&self) -> Vec<AgentRole> {
        AgentRole::ALL
            .iter()
            .filter(|r| self.subtasks.iter().any(|s| s.role == **r))
            .copied()
            .collect()
    }
}

/// The planner.
#[derive(Debug, Clone, Default)]
pub struct TaskPlanner {
    config: PlannerConfig,
}

impl TaskPlanner {
    /// Planner with `config`.
    #[must_use]
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Filter selecting the outcome records the planner learns from.
    #[must_use]
    pub fn history_filter(&self, task: &Task) -> MemoryFilter {
        MemoryFilter::new()
            .category(MemoryCategory::Project)
            .tags_any([keys::TASK_OUTCOME])
            .text(task.description.clone())
            .max_security(AgentRole::Orchestrator.access_tier())
            .limit(self.config.history_limit)
    }

    /// Read a memory snapshot through `context` and plan against it.
    pub async fn plan_with_memory(
        &self,
        task: &Task,
        context: &ContextEngine,
    ) -> crate::Result<DecompositionResult> {
        let history = context.search(&self.history_filter(task)).await?;
        debug!(task_id = %task.id, history = history.len(), "planner history loaded");
        Ok(self.plan(task, &history)?)
    }

    /// Decompose `task` given `history`.
    pub fn plan(&self, task: &Task, history: &[MemoryRecord]) -> Result<DecompositionResult, PlanError> {
        let text_lower = task.description.to_lowercase();
        let words = text::words(&task.description);
        let meaningful = text::meaningful_words(&task.description);

        if meaningful.len() < self.config.min_meaningful_words {
            return Err(PlanError::AmbiguousScope(format!(
                "need at least {} meaningful words, found {}",
                self.config.min_meaningful_words,
                meaningful.len()
            )));
        }

        let similar = similarity::find_similar(
            task,
            history,
            self.config.similarity_threshold,
            self.config.top_k,
        );
        let estimate = complexity::estimate_complexity(&text_lower, &words, &similar);
        if estimate.keyword_hits == 0 && !text::has_action_verb(&words) {
            return Err(PlanError::AmbiguousScope(
                "no action or recognisable kind of work in the description".to_string(),
            ));
        }

        let level = estimate.level;
        let (strategy, strategy_scores) =
            strategy::select_strategy(&text_lower, level, &similar, self.config.confidence_samples);

        let subtasks = self.build_subtasks(task, level, strategy);
        let order = dag::topological_order(&subtasks)?;
        let subtasks = sort_by_order(subtasks, &order);

        let approval_reasons = self.approval_reasons(&text_lower, level);
        let total_hours = subtasks.iter().map(|s| s.estimated_hours).sum();
        let confidence = match similar.first() {
            Some(top) => (complexity::level_confidence(level) + top.similarity) / 2.0,
            None => complexity::level_confidence(level),
        };

        info!(
            task_id = %task.id,
            complexity = %level,
            strategy = %strategy,
            subtasks = subtasks.len(),
            similar = similar.len(),
            requires_approval = !approval_reasons.is_empty(),
            "task decomposed"
        );

        Ok(DecompositionResult {
            task_id: task.id,
            complexity: estimate,
            strategy,
            strategy_scores,
            subtasks,
            similar_tasks: similar,
            requires_approval: !approval_reasons.is_empty(),
            approval_reasons,
            total_hours,
            confidence,
        })
    }

    fn build_subtasks(&self, task: &Task, level: Complexity, strategy: Strategy) -> Vec<Subtask> {
        let steps = templates::template_for(level);

        if strategy == Strategy::SingleUnit || steps.len() == 1 {
            let hours = steps.iter().map(|s| s.hours).sum();
            let subtask = Subtask::new(
                task.id,
                "Complete the task",
                task.description.clone(),
                AgentRole::best_match(&task.description),
            )
            .with_estimate(hours)
            .with_priority(blend_priority(0, 1, task.priority));
            return vec![subtask];
        }

        let total = steps.len();
        let mut subtasks: Vec<Subtask> = steps
            .iter()
            .enumerate()
            .map(|(i, step)| {
                Subtask::new(
                    task.id,
                    step.title,
                    format!("{}: {}", step.summary, task.description),
                    AgentRole::best_match(step.title),
                )
                .with_estimate(step.hours)
                .with_priority(blend_priority(i, total, task.priority))
            })
            .collect();

        let ids: Vec<SubtaskId> = subtasks.iter().map(|s| s.id).collect();
        for (subtask, deps) in subtasks
            .iter_mut()
            .zip(templates::dependencies_for(strategy, steps))
        {
            subtask.dependencies = deps.into_iter().map(|d| ids[d]).collect();
        }
        subtasks
    }

    fn approval_reasons(&self, text_lower: &str, level: Complexity) -> Vec<String> {
        let mut reasons = Vec::new();
        if level >= Complexity::Complex {
            reasons.push(format!("complexity is {level}"));
        }
        let words = text::words(text_lower);
        // Short stems ("auth") also match longer words ("authentication")
        for keyword in &self.config.approval_keywords {
            let k = keyword.as_str();
            let hit = words.iter().any(|w| {
                w == k || w.strip_suffix('s') == Some(k) || (k.len() <= 4 && w.starts_with(k))
            });
            if hit {
                reasons.push(format!("mentions '{keyword}'"));
            }
        }
        reasons
    }
}

/// Position-based priority, averaged with the task's priority.
fn blend_priority(index: usize, total: usize, task_priority: u8) -> u8 {
    let total = total.max(1);
    let positional = 10_i64 - ((index as f64 / total as f64) * 5.0).floor() as i64;
    let positional = positional.clamp(i64::from(MIN_PRIORITY), i64::from(MAX_PRIORITY));
    let blended = (positional + i64::from(task_priority) + 1) / 2;
    blended.clamp(i64::from(MIN_PRIORITY), i64::from(MAX_PRIORITY)) as u8
}

fn sort_by_order(subtasks: Vec<Subtask>, order: &[SubtaskId]) -> Vec<Subtask> {
    let mut by_id: std::collections::HashMap<SubtaskId, Subtask> =
        subtasks.into_iter().map(|s| (s.id, s)).collect();
    order.iter().filter_map(|id| by_id.remove(id)).collect()
}

#[cfg(test)]
mod tests;
