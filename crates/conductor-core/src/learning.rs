//! Continuous Learning Engine
//!
//! Turns finished tasks into memory:
//! - every outcome is written as a task-outcome record the planner reads
//! - successful outcomes are clustered into Pattern records whose score is
//!   the cluster's success rate
//! - failed outcomes produce an Error record with prevention strategies,
//!   linked to the outcome and to the pattern it broke
//!
//! This is the only writer of derived Pattern and Error records. All writes
//! are keyed by the outcome id so recording the same outcome twice (for
//! example after a workflow resumes) changes nothing.

pub mod classify;
pub mod prevention;

pub use classify::{classify, outcome_similarity, PatternType};

use crate::agents::AgentRole;
use crate::context::ContextEngine;
use crate::error::Result;
use crate::event_bus::{EventBus, OrchestrationEvent};
use crate::planner::{DecompositionResult, Strategy};
use crate::task::{Complexity, Task, TaskFailure, TaskId, TaskResult};
use conductor_memory::{MemoryCategory, MemoryFilter, MemoryRecord, RecordId, SecurityLevel};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Metadata keys and tags shared by the records the engine writes.
pub mod keys {
    /// Record kind
    pub const KIND: &str = "kind";
    /// Kind and tag of task-outcome records
    pub const TASK_OUTCOME: &str = "task_outcome";
    /// Kind and tag of learned Pattern records
    pub const LEARNED_PATTERN: &str = "learned_pattern";
    /// Kind and tag of learned Error records
    pub const LEARNED_ERROR: &str = "learned_error";
    /// Task the record came from
    pub const TASK_ID: &str = "task_id";
    /// Outcome the record came from
    pub const OUTCOME_ID: &str = "outcome_id";
    /// Strategy used (`Strategy::as_str`)
    pub const STRATEGY: &str = "strategy";
    /// Planned complexity (serde value)
    pub const COMPLEXITY: &str = "complexity";
    /// Whether the task succeeded
    pub const SUCCEEDED: &str = "succeeded";
    /// Actual duration, or the mean duration on patterns
    pub const DURATION_MS: &str = "duration_ms";
    /// Estimated duration
    pub const ESTIMATED_MS: &str = "estimated_ms";
    /// Roles that took part
    pub const ROLES: &str = "roles";
    /// Successful samples on a pattern
    pub const SUCCESS_COUNT: &str = "success_count";
    /// All samples on a pattern
    pub const SAMPLE_COUNT: &str = "sample_count";
    /// Failed samples on a pattern
    pub const FAILURE_COUNT: &str = "failure_count";
    /// Outcome ids already counted on a pattern
    pub const OUTCOMES: &str = "outcomes";
    /// Classification of the latest outcome
    pub const PATTERN_TYPE: &str = "pattern_type";
    /// Failure reason code
    pub const REASON: &str = "reason";
    /// Failure factors
    pub const FAILURE_FACTORS: &str = "failure_factors";
    /// Prevention strategies
    pub const STRATEGIES: &str = "prevention_strategies";

    /// Tags the engine adds itself; ignored when comparing technologies.
    pub const SYSTEM_TAGS: &[&str] = &[
        TASK_OUTCOME,
        LEARNED_PATTERN,
        LEARNED_ERROR,
        "successful",
        "best_practice",
        "error_prone",
        "lesson_learned",
    ];
}

/// Learning engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Similarity at which an outcome joins an existing pattern
    #[serde(default = "default_cluster_threshold")]
    pub cluster_threshold: f64,
    /// Pattern score above which a failure counts as a regression
    #[serde(default = "default_regression_score")]
    pub regression_score: f64,
    /// Actual/estimated ratio at or below which a success is efficient
    #[serde(default = "default_efficiency_ratio")]
    pub efficiency_ratio: f64,
    /// Distinct roles that make a success a collaboration
    #[serde(default = "default_collaboration_roles")]
    pub collaboration_roles: usize,
    /// Failures on one pattern before suggesting another approach
    #[serde(default = "default_alternative_after")]
    pub alternative_after_failures: u64,
    /// Pattern records compared per outcome
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,
    /// Security level of derived records
    #[serde(default = "default_security_level")]
    pub security_level: SecurityLevel,
}

fn default_cluster_threshold() -> f64 {
    0.8
}

fn default_regression_score() -> f64 {
    0.8
}

fn default_efficiency_ratio() -> f64 {
    0.5
}

fn default_collaboration_roles() -> usize {
    3
}

fn default_alternative_after() -> u64 {
    3
}

fn default_candidate_limit() -> usize {
    200
}

fn default_security_level() -> SecurityLevel {
    SecurityLevel::TeamOnly
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            cluster_threshold: default_cluster_threshold(),
            regression_score: default_regression_score(),
            efficiency_ratio: default_efficiency_ratio(),
            collaboration_roles: default_collaboration_roles(),
            alternative_after_failures: default_alternative_after(),
            candidate_limit: default_candidate_limit(),
            security_level: default_security_level(),
        }
    }
}

impl LearningConfig {
    /// Set the cluster threshold.
    #[must_use]
    pub fn with_cluster_threshold(mut self, threshold: f64) -> Self {
        self.cluster_threshold = threshold;
        self
    }

    /// Set the security level of derived records.
    #[must_use]
    pub fn with_security_level(mut self, level: SecurityLevel) -> Self {
        self.security_level = level;
        self
    }
}

/// A finished task, as the learning engine sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    /// Idempotency key for every write derived from this outcome
    pub id: Uuid,
    /// Task that finished
    pub task_id: TaskId,
    /// Task description
    pub description: String,
    /// Task project
    pub project: Option<String>,
    /// Task tags (technologies, areas)
    pub tags: BTreeSet<String>,
    /// Roles that ran subtasks
    pub roles: BTreeSet<AgentRole>,
    /// Planned complexity
    pub complexity: Option<Complexity>,
    /// Strategy used
    pub strategy: Option<Strategy>,
    /// Whether every subtask succeeded
    pub succeeded: bool,
    /// First failure, if any
    pub failure: Option<TaskFailure>,
    /// Actual duration
    pub duration_ms: u64,
    /// Estimated duration
    pub estimated_ms: Option<u64>,
    /// Subtasks in the plan
    pub subtask_count: usize,
    /// Subtasks that failed
    pub failed_count: usize,
}

impl Outcome {
    /// Build an outcome from a finished task.
    #[must_use]
    pub fn from_result(task: &Task, result: &TaskResult, plan: Option<&DecompositionResult>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id: task.id,
            description: task.description.clone(),
            project: task.project.clone(),
            tags: task.tags.clone(),
            roles: result.roles(),
            complexity: plan.map(|p| p.complexity.level).or(task.complexity),
            strategy: plan.map(|p| p.strategy),
            succeeded: result.is_success(),
            failure: result.failure.clone(),
            duration_ms: result.duration_ms,
            estimated_ms: None,
            subtask_count: result.subtask_results.len(),
            failed_count: result
                .subtask_results
                .iter()
                .filter(|r| !r.is_success())
                .count(),
        }
    }

    /// Use a fixed idempotency key.
    #[must_use]
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Attach the estimated duration.
    #[must_use]
    pub fn with_estimate(mut self, estimated_ms: u64) -> Self {
        self.estimated_ms = Some(estimated_ms);
        self
    }

    /// The task-outcome record the planner learns from.
    fn to_record(&self, security: SecurityLevel) -> MemoryRecord {
        let summary = match &self.failure {
            Some(failure) => format!("Failed: {failure}"),
            None => format!(
                "Succeeded with {} subtask(s) in {} ms",
                self.subtask_count, self.duration_ms
            ),
        };
        let mut record = MemoryRecord::new(MemoryCategory::Project, &self.description, summary)
            .with_tags(self.tags.iter().cloned())
            .with_tag(keys::TASK_OUTCOME)
            .with_score(if self.succeeded { 1.0 } else { 0.0 })
            .with_security(security)
            .with_metadata(keys::KIND, json!(keys::TASK_OUTCOME))
            .with_metadata(keys::TASK_ID, json!(self.task_id.to_string()))
            .with_metadata(keys::OUTCOME_ID, json!(self.id.to_string()))
            .with_metadata(keys::SUCCEEDED, json!(self.succeeded))
            .with_metadata(keys::DURATION_MS, json!(self.duration_ms))
            .with_metadata(keys::ROLES, json!(role_names(&self.roles)));
        record.id = self.id;
        if let Some(project) = &self.project {
            record = record.with_project(project.clone());
        }
        if let Some(complexity) = self.complexity {
            record = record.with_metadata(keys::COMPLEXITY, json!(complexity.as_str()));
        }
        if let Some(strategy) = self.strategy {
            record = record.with_metadata(keys::STRATEGY, json!(strategy.as_str()));
        }
        if let Some(estimated) = self.estimated_ms {
            record = record.with_metadata(keys::ESTIMATED_MS, json!(estimated));
        }
        record
    }
}

fn role_names(roles: &BTreeSet<AgentRole>) -> Vec<&'static str> {
    roles.iter().map(AgentRole::as_str).collect()
}

/// What recording one outcome did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LearningReport {
    /// Outcome recorded
    pub outcome_id: Uuid,
    /// Classification
    pub pattern_type: PatternType,
    /// Pattern created, reinforced or weakened
    pub pattern_id: Option<RecordId>,
    /// An existing pattern was updated rather than created
    pub reinforced: bool,
    /// Error record written for a failure
    pub error_record_id: Option<RecordId>,
    /// The outcome had already been recorded; nothing changed
    pub duplicate: bool,
}

/// Counters since the engine was created.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LearningStats {
    /// Outcomes recorded (duplicates excluded)
    pub outcomes_captured: u64,
    /// New Pattern records
    pub patterns_created: u64,
    /// Existing Pattern records updated
    pub patterns_reinforced: u64,
    /// Error records written
    pub error_records: u64,
    /// Mean of `min(actual, estimate) / max(actual, estimate)`
    pub estimation_accuracy: Option<f64>,
    #[serde(skip)]
    accuracy_sum: f64,
    #[serde(skip)]
    accuracy_samples: u64,
}

impl LearningStats {
    fn add_accuracy(&mut self, actual: u64, estimated: u64) {
        self.accuracy_sum += classify::ratio(actual, estimated);
        self.accuracy_samples += 1;
        self.estimation_accuracy = Some(self.accuracy_sum / self.accuracy_samples as f64);
    }
}

/// The learning engine.
pub struct LearningEngine {
    context: Arc<ContextEngine>,
    events: Option<Arc<EventBus>>,
    config: LearningConfig,
    stats: RwLock<LearningStats>,
    // Pattern updates are read-modify-write; one outcome at a time
    write_lock: Mutex<()>,
}

impl LearningEngine {
    /// Engine writing through `context`.
    pub fn new(context: Arc<ContextEngine>, config: LearningConfig) -> Self {
        Self {
            context,
            events: None,
            config,
            stats: RwLock::new(LearningStats::default()),
            write_lock: Mutex::new(()),
        }
    }

    /// Publish `PatternLearned` events.
    #[must_use]
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &LearningConfig {
        &self.config
    }

    /// Counter snapshot.
    pub async fn stats(&self) -> LearningStats {
        self.stats.read().await.clone()
    }

    /// Learned patterns, best first.
    pub async fn patterns(&self, limit: usize) -> Result<Vec<MemoryRecord>> {
        let mut patterns = self.load_patterns().await?;
        patterns.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.counter(keys::SAMPLE_COUNT).cmp(&a.counter(keys::SAMPLE_COUNT)))
                .then_with(|| a.id.cmp(&b.id))
        });
        patterns.truncate(limit);
        Ok(patterns)
    }

    /// Capture `outcome` durably, then derive patterns and error records.
    ///
    /// Returns once every write has reached the store.
    pub async fn record_outcome(&self, outcome: &Outcome) -> Result<LearningReport> {
        let _guard = self.write_lock.lock().await;

        let outcome_record_id = self
            .context
            .teach(outcome.to_record(self.config.security_level))
            .await?;

        let patterns = self.load_patterns().await?;
        let matching = patterns
            .iter()
            .map(|p| (p, outcome_similarity(outcome, p)))
            .filter(|(_, sim)| *sim >= self.config.cluster_threshold)
            .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| b.0.id.cmp(&a.0.id)))
            .map(|(p, _)| p);

        let pattern_type = classify(outcome, matching, &self.config);

        let counted_on = patterns.iter().find(|p| has_outcome(p, outcome.id));
        let error_record = if outcome.succeeded {
            None
        } else {
            self.find_error_record(outcome.id).await?
        };
        let duplicate = if outcome.succeeded {
            counted_on.is_some()
        } else {
            error_record.is_some()
        };
        if duplicate {
            debug!(outcome_id = %outcome.id, "outcome already recorded");
            return Ok(LearningReport {
                outcome_id: outcome.id,
                pattern_type,
                pattern_id: counted_on.map(|p| p.id),
                reinforced: false,
                error_record_id: error_record.map(|r| r.id),
                duplicate: true,
            });
        }

        let mut report = LearningReport {
            outcome_id: outcome.id,
            pattern_type,
            pattern_id: None,
            reinforced: false,
            error_record_id: None,
            duplicate: false,
        };

        if outcome.succeeded {
            let (pattern_id, reinforced) = match matching {
                Some(existing) => {
                    let updated = add_sample(existing.clone(), outcome, pattern_type);
                    (self.context.teach(updated).await?, true)
                }
                None => {
                    let created = new_pattern(outcome, pattern_type, self.config.security_level);
                    (self.context.teach(created).await?, false)
                }
            };
            report.pattern_id = Some(pattern_id);
            report.reinforced = reinforced;
            if let Some(events) = &self.events {
                events.publish(OrchestrationEvent::PatternLearned {
                    task_id: outcome.task_id,
                    record_id: pattern_id,
                    reinforced,
                });
            }
            info!(
                outcome_id = %outcome.id,
                pattern_id = %pattern_id,
                pattern_type = %pattern_type,
                reinforced,
                "pattern learned"
            );
        } else {
            let weakened = match matching.filter(|p| !has_outcome(p, outcome.id)) {
                Some(existing) => {
                    let updated = add_sample(existing.clone(), outcome, pattern_type);
                    let failures = updated.counter(keys::FAILURE_COUNT);
                    let id = self.context.teach(updated).await?;
                    Some((id, failures))
                }
                None => None,
            };
            report.pattern_id = weakened.map(|(id, _)| id);
            report.reinforced = weakened.is_some();

            let failures_at_pattern = weakened.map_or(0, |(_, failures)| failures);
            let error_id = self
                .write_error_record(outcome, outcome_record_id, report.pattern_id, failures_at_pattern)
                .await?;
            report.error_record_id = Some(error_id);
        }

        let mut stats = self.stats.write().await;
        stats.outcomes_captured += 1;
        match (outcome.succeeded, report.reinforced) {
            (true, true) => stats.patterns_reinforced += 1,
            (true, false) => stats.patterns_created += 1,
            (false, _) => {}
        }
        if report.error_record_id.is_some() {
            stats.error_records += 1;
        }
        if let Some(estimated) = outcome.estimated_ms {
            stats.add_accuracy(outcome.duration_ms, estimated);
        }

        Ok(report)
    }

    async fn load_patterns(&self) -> Result<Vec<MemoryRecord>> {
        let filter = MemoryFilter::new()
            .category(MemoryCategory::Pattern)
            .tags_any([keys::LEARNED_PATTERN])
            .max_security(SecurityLevel::Confidential)
            .limit(self.config.candidate_limit);
        self.context.search(&filter).await
    }

    async fn find_error_record(&self, outcome_id: Uuid) -> Result<Option<MemoryRecord>> {
        let filter = MemoryFilter::new()
            .category(MemoryCategory::Error)
            .tags_any([keys::LEARNED_ERROR])
            .max_security(SecurityLevel::Confidential)
            .limit(self.config.candidate_limit);
        let wanted = outcome_id.to_string();
        Ok(self.context.search(&filter).await?.into_iter().find(|r| {
            r.metadata.get(keys::OUTCOME_ID).and_then(|v| v.as_str()) == Some(wanted.as_str())
        }))
    }

    async fn write_error_record(
        &self,
        outcome: &Outcome,
        outcome_record_id: RecordId,
        pattern_id: Option<RecordId>,
        failures_at_pattern: u64,
    ) -> Result<RecordId> {
        let failure = outcome.failure.clone().unwrap_or_else(|| TaskFailure {
            subtask_id: outcome.task_id,
            reason: crate::error::ReasonCode::AgentError,
            message: "task failed".to_string(),
            sibling_failures: outcome.failed_count.saturating_sub(1),
        });
        let factors = prevention::failure_factors(&failure);
        let strategies = prevention::prevention_strategies(
            &factors,
            failures_at_pattern,
            self.config.alternative_after_failures,
        );

        let content = format!(
            "{}\n\nPrevention:\n{}",
            failure,
            strategies
                .iter()
                .map(|s| format!("- {s}"))
                .collect::<Vec<_>>()
                .join("\n")
        );
        let mut record = MemoryRecord::new(
            MemoryCategory::Error,
            format!("Failure: {}", outcome.description),
            content,
        )
        .with_tags(outcome.tags.iter().cloned())
        .with_tags([keys::LEARNED_ERROR, "error_prone", "lesson_learned"])
        .with_tag(failure.reason.to_string())
        .with_security(self.config.security_level)
        .with_score(0.5)
        .with_metadata(keys::KIND, json!(keys::LEARNED_ERROR))
        .with_metadata(keys::TASK_ID, json!(outcome.task_id.to_string()))
        .with_metadata(keys::OUTCOME_ID, json!(outcome.id.to_string()))
        .with_metadata(keys::REASON, json!(failure.reason))
        .with_metadata(keys::FAILURE_FACTORS, json!(factors))
        .with_metadata(keys::STRATEGIES, json!(strategies));
        if let Some(project) = &outcome.project {
            record = record.with_project(project.clone());
        }

        let error_id = self.context.teach(record).await?;
        let store = self.context.store();
        store.link(error_id, outcome_record_id, 1.0).await?;
        if let Some(pattern_id) = pattern_id {
            if let Err(e) = store.link(error_id, pattern_id, 0.5).await {
                warn!(error_id = %error_id, pattern_id = %pattern_id, error = %e, "pattern link failed");
            }
        }
        info!(
            outcome_id = %outcome.id,
            error_id = %error_id,
            reason = %failure.reason,
            strategies = strategies.len(),
            "failure recorded"
        );
        Ok(error_id)
    }
}

impl std::fmt::Debug for LearningEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LearningEngine")
            .field("config", &self.config)
            .finish()
    }
}

fn has_outcome(pattern: &MemoryRecord, outcome_id: Uuid) -> bool {
    let wanted = outcome_id.to_string();
    pattern
        .metadata
        .get(keys::OUTCOMES)
        .and_then(serde_json::Value::as_array)
        .is_some_and(|ids| ids.iter().any(|v| v.as_str() == Some(wanted.as_str())))
}

fn new_pattern(outcome: &Outcome, pattern_type: PatternType, security: SecurityLevel) -> MemoryRecord {
    let mut record = MemoryRecord::new(
        MemoryCategory::Pattern,
        &outcome.description,
        pattern_summary(outcome, 1, 1),
    )
    .with_tags(outcome.tags.iter().cloned())
    .with_tags([keys::LEARNED_PATTERN, "successful"])
    .with_score(1.0)
    .with_security(security)
    .with_metadata(keys::KIND, json!(keys::LEARNED_PATTERN))
    .with_metadata(keys::PATTERN_TYPE, json!(pattern_type))
    .with_metadata(keys::SUCCESS_COUNT, json!(1))
    .with_metadata(keys::SAMPLE_COUNT, json!(1))
    .with_metadata(keys::FAILURE_COUNT, json!(0))
    .with_metadata(keys::DURATION_MS, json!(outcome.duration_ms))
    .with_metadata(keys::ROLES, json!(role_names(&outcome.roles)))
    .with_metadata(keys::OUTCOMES, json!([outcome.id.to_string()]));
    if let Some(project) = &outcome.project {
        record = record.with_project(project.clone());
    }
    if let Some(strategy) = outcome.strategy {
        record = record.with_metadata(keys::STRATEGY, json!(strategy.as_str()));
    }
    record
}

/// Count `outcome` on `pattern` and recompute its success rate.
fn add_sample(mut pattern: MemoryRecord, outcome: &Outcome, pattern_type: PatternType) -> MemoryRecord {
    let successes = pattern.counter(keys::SUCCESS_COUNT) + u64::from(outcome.succeeded);
    let failures = pattern.counter(keys::FAILURE_COUNT) + u64::from(!outcome.succeeded);
    let samples = pattern.counter(keys::SAMPLE_COUNT).max(1) + 1;
    let mean_duration = (pattern.counter(keys::DURATION_MS) * (samples - 1) + outcome.duration_ms) / samples;

    let mut outcomes: Vec<serde_json::Value> = pattern
        .metadata
        .get(keys::OUTCOMES)
        .and_then(serde_json::Value::as_array)
        .cloned()
        .unwrap_or_default();
    outcomes.push(json!(outcome.id.to_string()));

    pattern.score = (successes as f64 / samples as f64).clamp(0.0, 1.0);
    pattern.tags.extend(outcome.tags.iter().cloned());
    if pattern.score < 0.5 {
        pattern.tags.remove("successful");
        pattern.tags.insert("error_prone".to_string());
    }
    pattern.content = pattern_summary(outcome, successes, samples);
    let metadata = &mut pattern.metadata;
    metadata.insert(keys::SUCCESS_COUNT.to_string(), json!(successes));
    metadata.insert(keys::FAILURE_COUNT.to_string(), json!(failures));
    metadata.insert(keys::SAMPLE_COUNT.to_string(), json!(samples));
    metadata.insert(keys::DURATION_MS.to_string(), json!(mean_duration));
    metadata.insert(keys::OUTCOMES.to_string(), serde_json::Value::Array(outcomes));
    metadata.insert(keys::PATTERN_TYPE.to_string(), json!(pattern_type));
    pattern
}

fn pattern_summary(outcome: &Outcome, successes: u64, samples: u64) -> String {
    let roles = role_names(&outcome.roles).join(", ");
    let strategy = outcome.strategy.map_or("unknown", |s| s.as_str());
    format!(
        "{successes} of {samples} similar task(s) succeeded. Last run used strategy {strategy} with roles [{roles}] in {} ms.",
        outcome.duration_ms
    )
}

#[cfg(test)]
mod tests;
