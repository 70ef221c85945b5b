use super::types::OrchestrationEvent;
use tokio::sync::broadcast;
use tracing::trace;

/// Broadcast-based event bus.
///
/// Slow subscribers miss events (lagged) rather than blocking the publisher.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<OrchestrationEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to all future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestrationEvent> {
        self.sender.subscribe()
    }

    /// Publish to every subscriber; returns how many received it.
    pub fn publish(&self, event: OrchestrationEvent) -> usize {
        trace!(event = event.kind(), task_id = %event.task_id(), "event published");
        // No receivers is not an error
        self.sender.send(event).unwrap_or(0)
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(512)
    }
}
