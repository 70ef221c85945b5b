use super::*;

#[test]
fn test_task_status_moves_forward_only() {
    let mut task = Task::new("add pagination to orders api");
    task.advance(TaskStatus::Decomposed).unwrap();
    task.advance(TaskStatus::Running).unwrap();

    let err = task.advance(TaskStatus::Decomposed).unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
    assert_eq!(task.status, TaskStatus::Running);
}

#[test]
fn test_task_terminal_status_is_final() {
    let mut task = Task::new("x");
    task.advance(TaskStatus::Done).unwrap();
    assert!(task.advance(TaskStatus::Failed).is_err());
    assert!(task.retry().is_err());
}

#[test]
fn test_failed_task_can_retry() {
    let mut task = Task::new("x");
    task.advance(TaskStatus::Running).unwrap();
    task.advance(TaskStatus::Failed).unwrap();

    task.retry().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    task.advance(TaskStatus::Decomposed).unwrap();
}

#[test]
fn test_priority_is_clamped() {
    assert_eq!(Task::new("x").with_priority(0).priority, MIN_PRIORITY);
    assert_eq!(Task::new("x").with_priority(42).priority, MAX_PRIORITY);
}

#[test]
fn test_task_result_rollup_uses_first_failure() {
    let task_id = Uuid::new_v4();
    let a = Subtask::new(task_id, "a", "a", AgentRole::Engineer);
    let b = Subtask::new(task_id, "b", "b", AgentRole::QA);
    let c = Subtask::new(task_id, "c", "c", AgentRole::QA);

    let results = vec![
        SubtaskResult::failed(&a, ReasonCode::AgentError, "compile error", 3, 10),
        SubtaskResult::failed(&b, ReasonCode::DependencyFailed, "dep a failed", 0, 0),
        SubtaskResult::failed(&c, ReasonCode::DependencyFailed, "dep a failed", 0, 0),
    ];
    let result = TaskResult::from_results(task_id, results, 10);

    let failure = result.failure.clone().unwrap();
    assert_eq!(failure.subtask_id, a.id);
    assert_eq!(failure.reason, ReasonCode::AgentError);
    assert_eq!(failure.sibling_failures, 2);
    assert!(failure.to_string().contains("2 more subtask(s)"));
    assert!(!result.is_success());
}

#[test]
fn test_task_result_success() {
    let task_id = Uuid::new_v4();
    let a = Subtask::new(task_id, "a", "a", AgentRole::Engineer);
    let result = TaskResult::from_results(
        task_id,
        vec![SubtaskResult::succeeded(&a, SubtaskOutput::summary("ok"), 1, 5)],
        5,
    );
    assert!(result.is_success());
    assert_eq!(result.roles().len(), 1);
    assert!(result.result_for(a.id).is_some());
}
