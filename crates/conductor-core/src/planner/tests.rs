use super::*;
use crate::context::{ContextConfig, ContextEngine};
use conductor_memory::{InMemoryStore, MemoryStore};
use std::sync::Arc;

fn outcome(description: &str, complexity: Complexity, strategy: Strategy, succeeded: bool) -> MemoryRecord {
    MemoryRecord::new(MemoryCategory::Project, description, "recorded outcome")
        .with_tag(keys::TASK_OUTCOME)
        .with_metadata(keys::KIND, serde_json::json!(keys::TASK_OUTCOME))
        .with_metadata(keys::TASK_ID, serde_json::json!(uuid::Uuid::new_v4().to_string()))
        .with_metadata(keys::COMPLEXITY, serde_json::to_value(complexity).unwrap())
        .with_metadata(keys::STRATEGY, serde_json::json!(strategy.as_str()))
        .with_metadata(keys::SUCCEEDED, serde_json::json!(succeeded))
}

fn assert_dag(result: &DecompositionResult) {
    let mut seen = std::collections::HashSet::new();
    for subtask in &result.subtasks {
        assert!(
            subtask.dependencies.iter().all(|d| seen.contains(d)),
            "{} listed before a dependency",
            subtask.title
        );
        seen.insert(subtask.id);
    }
}

#[test]
fn test_ambiguous_descriptions_are_rejected() {
    let planner = TaskPlanner::default();
    for description in ["stuff", "the orders", "orders database backend"] {
        let err = planner.plan(&Task::new(description), &[]).unwrap_err();
        assert!(matches!(err, PlanError::AmbiguousScope(_)), "{description}");
    }
}

#[test]
fn test_ambiguous_maps_to_core_error() {
    let err: Error = PlanError::AmbiguousScope("x".into()).into();
    assert!(matches!(err, Error::AmbiguousScope(_)));
}

#[test]
fn test_trivial_task_is_single_unit() {
    let planner = TaskPlanner::default();
    let task = Task::new("Fix typo in README");
    let result = planner.plan(&task, &[]).unwrap();

    assert_eq!(result.complexity.level, Complexity::Trivial);
    assert_eq!(result.strategy, Strategy::SingleUnit);
    assert_eq!(result.subtasks.len(), 1);
    assert_eq!(result.subtasks[0].task_id, task.id);
    assert!(!result.requires_approval);
}

#[test]
fn test_medium_task_fans_out_without_history() {
    let planner = TaskPlanner::default();
    let task = Task::new("Add pagination to the orders API");
    let result = planner.plan(&task, &[]).unwrap();

    assert_eq!(result.complexity.level, Complexity::Medium);
    assert_eq!(result.strategy, Strategy::ParallelFanOut);
    assert_eq!(result.subtasks.len(), 6);
    assert_dag(&result);

    let first = &result.subtasks[0];
    assert_eq!(first.role, AgentRole::Researcher);
    assert!(first.dependencies.is_empty());

    let last = result.subtasks.last().unwrap();
    assert_eq!(last.role, AgentRole::CodeReviewEngineer);
    assert_eq!(last.dependencies.len(), 4);
    assert!(first.priority >= last.priority);
    assert!((result.total_hours - 24.0).abs() < 1e-9);
}

#[test]
fn test_history_selects_strategy() {
    let planner = TaskPlanner::default();
    let history: Vec<MemoryRecord> = (0..5)
        .map(|_| {
            outcome(
                "Add pagination to the users API",
                Complexity::Medium,
                Strategy::SequentialPipeline,
                true,
            )
        })
        .collect();
    let task = Task::new("Add pagination to the orders API");
    let result = planner.plan(&task, &history).unwrap();

    assert_eq!(result.similar_tasks.len(), 5);
    assert!(result.similar_tasks[0].similarity >= 0.8);
    assert_eq!(result.strategy, Strategy::SequentialPipeline);
    for pair in result.subtasks.windows(2) {
        assert_eq!(pair[1].dependencies.len(), 1);
        assert!(pair[1].dependencies.contains(&pair[0].id));
    }
    assert!(result.confidence > complexity::level_confidence(Complexity::Medium));
}

#[test]
fn test_dissimilar_history_is_ignored() {
    let planner = TaskPlanner::default();
    let history = vec![outcome(
        "Rotate the kafka brokers",
        Complexity::Epic,
        Strategy::Hybrid,
        true,
    )];
    let result = planner
        .plan(&Task::new("Add pagination to the orders API"), &history)
        .unwrap();
    assert!(result.similar_tasks.is_empty());
    assert_eq!(result.strategy, Strategy::ParallelFanOut);
}

#[test]
fn test_own_outcomes_are_not_similar_tasks() {
    let planner = TaskPlanner::default();
    let task = Task::new("Add pagination to the orders API");
    let own = outcome(&task.description, Complexity::Medium, Strategy::Hybrid, false)
        .with_metadata(keys::TASK_ID, serde_json::json!(task.id.to_string()));
    let result = planner.plan(&task, &[own]).unwrap();
    assert!(result.similar_tasks.is_empty());
}

#[test]
fn test_approval_triggers() {
    let planner = TaskPlanner::default();

    let result = planner.plan(&Task::new("Add password reset email"), &[]).unwrap();
    assert!(result.requires_approval);
    assert!(result.approval_reasons.iter().any(|r| r.contains("password")));

    let result = planner
        .plan(&Task::new("Implement authentication for admin pages"), &[])
        .unwrap();
    assert!(result.requires_approval);

    let result = planner
        .plan(&Task::new("Plan the platform migration for billing"), &[])
        .unwrap();
    assert_eq!(result.complexity.level, Complexity::Epic);
    assert_eq!(result.strategy, Strategy::Hybrid);
    assert_eq!(result.subtasks.len(), 12);
    assert!(result.requires_approval);
    assert_dag(&result);

    let result = planner
        .plan(&Task::new("Improve accessibility of the signup form"), &[])
        .unwrap();
    assert!(!result.requires_approval);
}

#[test]
fn test_plan_is_repeatable() {
    let planner = TaskPlanner::default();
    let task = Task::new("Refactor the invoice module and add tests");
    let a = planner.plan(&task, &[]).unwrap();
    let b = planner.plan(&task, &[]).unwrap();

    assert_eq!(a.strategy, b.strategy);
    assert_eq!(a.complexity, b.complexity);
    let titles = |r: &DecompositionResult| r.subtasks.iter().map(|s| s.title.clone()).collect::<Vec<_>>();
    assert_eq!(titles(&a), titles(&b));
}

#[test]
fn test_blend_priority() {
    assert_eq!(blend_priority(0, 6, 5), 8);
    assert_eq!(blend_priority(5, 6, 1), 4);
    assert_eq!(blend_priority(0, 1, 10), 10);
}

#[tokio::test]
async fn test_plan_with_memory_reads_outcomes() {
    let store = Arc::new(InMemoryStore::new());
    for _ in 0..3 {
        store
            .write(outcome(
                "Add pagination to the users API",
                Complexity::Medium,
                Strategy::IterativeRefinement,
                true,
            ))
            .await
            .unwrap();
    }
    // Not an outcome record
    store
        .write(MemoryRecord::new(MemoryCategory::Project, "Add pagination to the users API", "notes"))
        .await
        .unwrap();
    let engine = ContextEngine::new(store, ContextConfig::default());

    let planner = TaskPlanner::default();
    let result = planner
        .plan_with_memory(&Task::new("Add pagination to the orders API"), &engine)
        .await
        .unwrap();
    assert_eq!(result.similar_tasks.len(), 3);
    assert_eq!(result.strategy, Strategy::IterativeRefinement);
}
