use super::*;
use crate::error::ReasonCode;
use uuid::Uuid;

#[tokio::test]
async fn test_publish_subscribe() {
    let bus = EventBus::new(16);
    let mut rx = bus.subscribe();

    let task_id = Uuid::new_v4();
    bus.publish(OrchestrationEvent::TaskCreated { task_id });

    let event = rx.recv().await.unwrap();
    assert_eq!(event.task_id(), task_id);
    assert_eq!(event.kind(), "task_created");
}

#[tokio::test]
async fn test_multiple_subscribers() {
    let bus = EventBus::new(16);
    let mut rx1 = bus.subscribe();
    let mut rx2 = bus.subscribe();
    assert_eq!(bus.subscriber_count(), 2);

    let task_id = Uuid::new_v4();
    let count = bus.publish(OrchestrationEvent::SubtaskFailed {
        task_id,
        subtask_id: Uuid::new_v4(),
        reason: ReasonCode::DependencyFailed,
    });
    assert_eq!(count, 2);
    assert_eq!(rx1.recv().await.unwrap().task_id(), task_id);
    assert_eq!(rx2.recv().await.unwrap().task_id(), task_id);
}

#[test]
fn test_publish_without_subscribers() {
    let bus = EventBus::default();
    assert_eq!(
        bus.publish(OrchestrationEvent::TaskCreated {
            task_id: Uuid::nil()
        }),
        0
    );
}

#[test]
fn test_event_serialization() {
    let event = OrchestrationEvent::SubtaskFailed {
        task_id: Uuid::nil(),
        subtask_id: Uuid::nil(),
        reason: ReasonCode::AgentError,
    };
    let json = serde_json::to_string(&event).unwrap();
    assert!(json.contains("\"type\":\"subtask_failed\""));
    assert!(json.contains("\"reason\":\"agent_error\""));
}
