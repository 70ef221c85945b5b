use super::*;
use crate::agents::AgentRole;
use crate::context::ContextConfig;
use crate::error::ReasonCode;
use crate::task::{Subtask, SubtaskOutput, SubtaskResult};
use conductor_memory::{InMemoryStore, MemoryStore};

struct Harness {
    store: Arc<InMemoryStore>,
    engine: LearningEngine,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let context = Arc::new(ContextEngine::new(store.clone(), ContextConfig::default()));
    Harness {
        store,
        engine: LearningEngine::new(context, LearningConfig::default()),
    }
}

fn outcome(succeeded: bool) -> Outcome {
    Outcome {
        id: Uuid::new_v4(),
        task_id: Uuid::new_v4(),
        description: "add pagination to the orders api".to_string(),
        project: Some("shop".to_string()),
        tags: ["api".to_string(), "rust".to_string()].into_iter().collect(),
        roles: [AgentRole::Engineer].into_iter().collect(),
        complexity: Some(Complexity::Simple),
        strategy: Some(Strategy::SequentialPipeline),
        succeeded,
        failure: (!succeeded).then(|| TaskFailure {
            subtask_id: Uuid::new_v4(),
            reason: ReasonCode::Timeout,
            message: "integration tests timed out".to_string(),
            sibling_failures: 0,
        }),
        duration_ms: 1_000,
        estimated_ms: None,
        subtask_count: 2,
        failed_count: usize::from(!succeeded),
    }
}

#[tokio::test]
async fn test_similar_successes_reinforce_one_pattern() {
    let h = harness();

    let first = h.engine.record_outcome(&outcome(true)).await.unwrap();
    assert_eq!(first.pattern_type, PatternType::NovelApproach);
    assert!(!first.reinforced);

    let second = h.engine.record_outcome(&outcome(true)).await.unwrap();
    let third = h.engine.record_outcome(&outcome(true)).await.unwrap();
    assert_eq!(second.pattern_type, PatternType::Success);
    assert!(second.reinforced && third.reinforced);
    assert_eq!(second.pattern_id, first.pattern_id);
    assert_eq!(third.pattern_id, first.pattern_id);

    let patterns = h.engine.patterns(10).await.unwrap();
    assert_eq!(patterns.len(), 1);
    let pattern = &patterns[0];
    assert_eq!(pattern.counter(keys::SUCCESS_COUNT), 3);
    assert_eq!(pattern.counter(keys::SAMPLE_COUNT), 3);
    assert_eq!(pattern.score, 1.0);
    assert_eq!(pattern.security_level, SecurityLevel::TeamOnly);
    assert!(pattern.has_tag("api") && pattern.has_tag(keys::LEARNED_PATTERN));

    let stats = h.engine.stats().await;
    assert_eq!(stats.outcomes_captured, 3);
    assert_eq!(stats.patterns_created, 1);
    assert_eq!(stats.patterns_reinforced, 2);
}

#[tokio::test]
async fn test_recording_twice_changes_nothing() {
    let h = harness();
    let o = outcome(true);

    let first = h.engine.record_outcome(&o).await.unwrap();
    let count = h.store.count().await.unwrap();

    let again = h.engine.record_outcome(&o).await.unwrap();
    assert!(again.duplicate);
    assert_eq!(again.pattern_id, first.pattern_id);
    assert_eq!(h.store.count().await.unwrap(), count);

    let patterns = h.engine.patterns(10).await.unwrap();
    assert_eq!(patterns[0].counter(keys::SAMPLE_COUNT), 1);
    assert_eq!(h.engine.stats().await.outcomes_captured, 1);
}

#[tokio::test]
async fn test_outcome_record_is_readable_by_planner() {
    let h = harness();
    let o = outcome(true);
    h.engine.record_outcome(&o).await.unwrap();

    let record = h.store.get(o.id).await.unwrap().unwrap();
    assert_eq!(record.category, MemoryCategory::Project);
    assert!(record.has_tag(keys::TASK_OUTCOME));
    assert_eq!(record.metadata[keys::KIND], json!(keys::TASK_OUTCOME));
    assert_eq!(record.metadata[keys::COMPLEXITY], json!("simple"));
    assert_eq!(record.metadata[keys::STRATEGY], json!(Strategy::SequentialPipeline.as_str()));
    assert_eq!(record.metadata[keys::SUCCEEDED], json!(true));
    assert_eq!(record.metadata[keys::TASK_ID], json!(o.task_id.to_string()));
    assert_eq!(record.project.as_deref(), Some("shop"));
}

#[tokio::test]
async fn test_failure_without_pattern_writes_error_record() {
    let h = harness();
    let o = outcome(false);

    let report = h.engine.record_outcome(&o).await.unwrap();
    assert_eq!(report.pattern_type, PatternType::Failure);
    assert!(report.pattern_id.is_none());
    assert!(h.engine.patterns(10).await.unwrap().is_empty());

    let error_id = report.error_record_id.unwrap();
    let error = h.store.get(error_id).await.unwrap().unwrap();
    assert_eq!(error.category, MemoryCategory::Error);
    assert!(error.has_tag("timeout"));
    assert_eq!(
        error.metadata[keys::FAILURE_FACTORS],
        json!(["timeline pressure", "integration complexity"])
    );
    assert_eq!(error.metadata[keys::OUTCOME_ID], json!(o.id.to_string()));
    assert_eq!(error.links.len(), 1);
    assert_eq!(error.links[0].target, o.id);
    assert_eq!(error.links[0].weight, 1.0);

    let outcome_record = h.store.get(o.id).await.unwrap().unwrap();
    assert_eq!(outcome_record.score, 0.0);
    assert_eq!(h.engine.stats().await.error_records, 1);
}

#[tokio::test]
async fn test_failure_on_reliable_pattern_is_regression() {
    let h = harness();
    let success = h.engine.record_outcome(&outcome(true)).await.unwrap();
    let pattern_id = success.pattern_id.unwrap();

    let failed = outcome(false);
    let report = h.engine.record_outcome(&failed).await.unwrap();
    assert_eq!(report.pattern_type, PatternType::Regression);
    assert_eq!(report.pattern_id, Some(pattern_id));

    let pattern = h.store.get(pattern_id).await.unwrap().unwrap();
    assert_eq!(pattern.counter(keys::FAILURE_COUNT), 1);
    assert_eq!(pattern.counter(keys::SAMPLE_COUNT), 2);
    assert!((pattern.score - 0.5).abs() < 1e-9);

    let error = h
        .store
        .get(report.error_record_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    let targets: Vec<_> = error.links.iter().map(|l| (l.target, l.weight)).collect();
    assert!(targets.contains(&(failed.id, 1.0)));
    assert!(targets.contains(&(pattern_id, 0.5)));

    // Duplicate failure: same error record, no second sample
    let again = h.engine.record_outcome(&failed).await.unwrap();
    assert!(again.duplicate);
    assert_eq!(again.error_record_id, report.error_record_id);
    let pattern = h.store.get(pattern_id).await.unwrap().unwrap();
    assert_eq!(pattern.counter(keys::SAMPLE_COUNT), 2);
}

#[tokio::test]
async fn test_repeated_failures_suggest_alternative_approach() {
    let h = harness();
    h.engine.record_outcome(&outcome(true)).await.unwrap();

    let mut last = None;
    for _ in 0..3 {
        last = Some(h.engine.record_outcome(&outcome(false)).await.unwrap());
    }
    let report = last.unwrap();
    assert_eq!(report.pattern_type, PatternType::Failure);

    let error = h
        .store
        .get(report.error_record_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    let strategies: Vec<String> =
        serde_json::from_value(error.metadata[keys::STRATEGIES].clone()).unwrap();
    assert!(strategies
        .iter()
        .any(|s| s.starts_with(prevention::ALTERNATIVE_APPROACH)));

    let pattern = h.store.get(report.pattern_id.unwrap()).await.unwrap().unwrap();
    assert!(pattern.score < 0.5);
    assert!(pattern.has_tag("error_prone"));
    assert!(!pattern.has_tag("successful"));
}

#[tokio::test]
async fn test_estimation_accuracy_and_efficiency() {
    let h = harness();

    let fast = outcome(true).with_estimate(4_000);
    let report = h.engine.record_outcome(&fast).await.unwrap();
    assert_eq!(report.pattern_type, PatternType::Efficiency);

    let mut on_time = outcome(true).with_estimate(1_000);
    on_time.duration_ms = 1_000;
    h.engine.record_outcome(&on_time).await.unwrap();

    let accuracy = h.engine.stats().await.estimation_accuracy.unwrap();
    assert!((accuracy - 0.625).abs() < 1e-9);
}

#[tokio::test]
async fn test_pattern_learned_event() {
    let store = Arc::new(InMemoryStore::new());
    let context = Arc::new(ContextEngine::new(store, ContextConfig::default()));
    let events = Arc::new(EventBus::new(16));
    let mut rx = events.subscribe();
    let engine = LearningEngine::new(context, LearningConfig::default()).with_events(events);

    let o = outcome(true);
    let report = engine.record_outcome(&o).await.unwrap();

    match rx.recv().await.unwrap() {
        OrchestrationEvent::PatternLearned {
            task_id,
            record_id,
            reinforced,
        } => {
            assert_eq!(task_id, o.task_id);
            assert_eq!(Some(record_id), report.pattern_id);
            assert!(!reinforced);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_outcome_from_result() {
    let task = Task::new("add pagination to the orders api").with_tags(["api"]);
    let a = Subtask::new(task.id, "design", "design the api", AgentRole::Architect);
    let b = Subtask::new(task.id, "build", "implement the api", AgentRole::Engineer);
    let result = TaskResult::from_results(
        task.id,
        vec![
            SubtaskResult::succeeded(&a, SubtaskOutput::summary("ok"), 1, 10),
            SubtaskResult::failed(&b, ReasonCode::AgentError, "boom", 3, 20),
        ],
        30,
    );

    let o = Outcome::from_result(&task, &result, None).with_estimate(60);
    assert!(!o.succeeded);
    assert_eq!(o.failed_count, 1);
    assert_eq!(o.subtask_count, 2);
    assert_eq!(o.roles.len(), 2);
    assert_eq!(o.duration_ms, 30);
    assert_eq!(o.estimated_ms, Some(60));
    assert_eq!(o.failure.as_ref().unwrap().reason, ReasonCode::AgentError);
    assert!(o.tags.contains("api"));
}
