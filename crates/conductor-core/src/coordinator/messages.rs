//! Agent-to-agent message bus.
//!
//! Messages are queued per (task, receiving role) and kept in a bounded
//! per-task history. A single queue per receiver keeps delivery order per
//! sender/receiver pair. Sending never waits on the dispatch loop.
//!
//! Agents share the bus the coordinator runs with (see
//! [`Coordinator::with_messages`](super::Coordinator::with_messages)) and
//! may block on [`MessageBus::next`] for a reply while they execute.

use crate::agents::AgentRole;
use crate::event_bus::{EventBus, OrchestrationEvent};
use crate::task::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};
use tracing::debug;
use uuid::Uuid;

/// What a message asks of its receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Expects a response
    Request,
    /// Answers a request
    Response,
    /// Informational
    Notification,
    /// Passes work or findings on to the receiver
    Handoff,
}

/// A structured message between two roles working on the same task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    /// Unique message ID
    pub id: Uuid,
    /// Task the exchange belongs to
    pub task_id: TaskId,
    /// Sender
    pub from: AgentRole,
    /// Receiver
    pub to: AgentRole,
    /// Message kind
    pub kind: MessageKind,
    /// Structured payload
    pub payload: serde_json::Value,
    /// Message this one answers
    #[serde(default)]
    pub reply_to: Option<Uuid>,
    /// When the message was created
    pub created_at: DateTime<Utc>,
}

impl AgentMessage {
    /// Create a message.
    pub fn new(
        task_id: TaskId,
        from: AgentRole,
        to: AgentRole,
        kind: MessageKind,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            from,
            to,
            kind,
            payload,
            reply_to: None,
            created_at: Utc::now(),
        }
    }

    /// Build a response to this message.
    #[must_use]
    pub fn reply(&self, payload: serde_json::Value) -> Self {
        let mut msg = Self::new(self.task_id, self.to, self.from, MessageKind::Response, payload);
        msg.reply_to = Some(self.id);
        msg
    }
}

/// In-memory message bus.
#[derive(Debug)]
pub struct MessageBus {
    queues: RwLock<HashMap<(TaskId, AgentRole), VecDeque<AgentMessage>>>,
    history: RwLock<HashMap<TaskId, Vec<AgentMessage>>>,
    max_history: usize,
    arrived: Notify,
    events: Option<Arc<EventBus>>,
}

impl MessageBus {
    /// Bus keeping at most `max_history` messages per task.
    pub fn new(max_history: usize) -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            history: RwLock::new(HashMap::new()),
            max_history,
            arrived: Notify::new(),
            events: None,
        }
    }

    /// Publish `message_sent` events to `events`.
    #[must_use]
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Queue a message for its receiver and record it in the task history.
    pub async fn send(&self, msg: AgentMessage) -> Uuid {
        let id = msg.id;
        let (task_id, from, to) = (msg.task_id, msg.from, msg.to);

        {
            let mut queues = self.queues.write().await;
            queues
                .entry((task_id, to))
                .or_default()
                .push_back(msg.clone());
        }

        {
            let mut history = self.history.write().await;
            let entries = history.entry(task_id).or_default();
            entries.push(msg);
            if entries.len() > self.max_history {
                let excess = entries.len() - self.max_history;
                entries.drain(..excess);
            }
        }

        self.arrived.notify_waiters();
        debug!(task_id = %task_id, from = %from, to = %to, message_id = %id, "agent message sent");
        if let Some(events) = &self.events {
            events.publish(OrchestrationEvent::MessageSent {
                task_id,
                from,
                to,
                message_id: id,
            });
        }
        id
    }

    /// Drain pending messages for `role` on `task_id`, oldest first.
    pub async fn receive(&self, task_id: TaskId, role: AgentRole) -> Vec<AgentMessage> {
        let mut queues = self.queues.write().await;
        queues
            .remove(&(task_id, role))
            .map(Vec::from)
            .unwrap_or_default()
    }

    /// Wait for the oldest pending message for `role` on `task_id`.
    ///
    /// Callers bound the wait themselves, e.g. with `tokio::time::timeout`.
    pub async fn next(&self, task_id: TaskId, role: AgentRole) -> AgentMessage {
        loop {
            let notified = self.arrived.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(msg) = self.pop(task_id, role).await {
                return msg;
            }
            notified.await;
        }
    }

    async fn pop(&self, task_id: TaskId, role: AgentRole) -> Option<AgentMessage> {
        let mut queues = self.queues.write().await;
        let queue = queues.get_mut(&(task_id, role))?;
        let msg = queue.pop_front();
        if queue.is_empty() {
            queues.remove(&(task_id, role));
        }
        msg
    }

    /// Pending messages without draining.
    pub async fn peek(&self, task_id: TaskId, role: AgentRole) -> Vec<AgentMessage> {
        let queues = self.queues.read().await;
        queues
            .get(&(task_id, role))
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of pending messages.
    pub async fn pending_count(&self, task_id: TaskId, role: AgentRole) -> usize {
        let queues = self.queues.read().await;
        queues.get(&(task_id, role)).map_or(0, VecDeque::len)
    }

    /// Every message of a task, in send order (bounded by `max_history`).
    pub async fn task_history(&self, task_id: TaskId) -> Vec<AgentMessage> {
        let history = self.history.read().await;
        history.get(&task_id).cloned().unwrap_or_default()
    }

    /// Drop queues and history of a finished task.
    pub async fn clear_task(&self, task_id: TaskId) {
        let dropped = self.history.write().await.remove(&task_id).map_or(0, |h| h.len());
        self.queues
            .write()
            .await
            .retain(|(queued_task, _), _| *queued_task != task_id);
        if dropped > 0 {
            debug!(task_id = %task_id, dropped, "message history cleared");
        }
    }

    /// Tasks with queued messages or history.
    pub async fn task_count(&self) -> usize {
        let mut tasks: std::collections::HashSet<TaskId> =
            self.history.read().await.keys().copied().collect();
        tasks.extend(self.queues.read().await.keys().map(|(task_id, _)| *task_id));
        tasks.len()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
