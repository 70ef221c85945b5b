//! Approval gate - human decisions keyed by task id
//!
//! A waiting workflow registers a oneshot receiver; `resolve` delivers the
//! decision. A decision that arrives before anyone waits is kept and handed
//! to the next registration. No decision within the timeout is a rejection.

use crate::task::TaskId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, warn};

/// Outcome of waiting for a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalDecision {
    /// A human approved
    Approved,
    /// A human rejected
    Rejected,
    /// Nobody answered in time
    Expired,
}

impl ApprovalDecision {
    /// Only an explicit approval lets the task run.
    #[must_use]
    pub fn is_approved(self) -> bool {
        self == Self::Approved
    }
}

/// Delivers approve/reject signals to waiting workflows.
pub struct ApprovalGate {
    waiters: RwLock<HashMap<TaskId, oneshot::Sender<ApprovalDecision>>>,
    early: RwLock<HashMap<TaskId, ApprovalDecision>>,
    timeout: Duration,
}

impl Default for ApprovalGate {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

impl ApprovalGate {
    /// Gate with the given decision timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            waiters: RwLock::new(HashMap::new()),
            early: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    /// Decision timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Start waiting for a decision on `task_id`.
    pub async fn register(&self, task_id: TaskId) -> oneshot::Receiver<ApprovalDecision> {
        let (tx, rx) = oneshot::channel();
        if let Some(decision) = self.early.write().await.remove(&task_id) {
            debug!(task_id = %task_id, ?decision, "decision was already given");
            let _ = tx.send(decision);
            return rx;
        }
        self.waiters.write().await.insert(task_id, tx);
        rx
    }

    /// Deliver a decision. Returns whether a workflow was waiting for it.
    pub async fn resolve(&self, task_id: TaskId, approved: bool) -> bool {
        let decision = if approved {
            ApprovalDecision::Approved
        } else {
            ApprovalDecision::Rejected
        };
        let waiter = self.waiters.write().await.remove(&task_id);
        let delivered = match waiter {
            Some(tx) => tx.send(decision).is_ok(),
            None => false,
        };
        if !delivered {
            self.early.write().await.insert(task_id, decision);
        }
        delivered
    }

    /// Wait on `rx` for at most the gate timeout.
    pub async fn wait(&self, task_id: TaskId, rx: oneshot::Receiver<ApprovalDecision>) -> ApprovalDecision {
        let decision = tokio::select! {
            result = rx => result.unwrap_or(ApprovalDecision::Rejected),
            _ = tokio::time::sleep(self.timeout) => ApprovalDecision::Expired,
        };
        self.waiters.write().await.remove(&task_id);
        if decision == ApprovalDecision::Expired {
            warn!(task_id = %task_id, timeout_secs = self.timeout.as_secs(), "approval expired");
        }
        decision
    }

    /// Stop waiting for `task_id` without a decision.
    pub async fn withdraw(&self, task_id: TaskId) -> bool {
        self.waiters.write().await.remove(&task_id).is_some()
    }

    /// Drop the waiter and any buffered decision of a finished task.
    pub async fn forget(&self, task_id: TaskId) {
        self.waiters.write().await.remove(&task_id);
        if self.early.write().await.remove(&task_id).is_some() {
            debug!(task_id = %task_id, "unused decision discarded");
        }
    }

    /// Tasks currently waiting for a decision.
    pub async fn pending(&self) -> Vec<TaskId> {
        self.waiters.read().await.keys().copied().collect()
    }
}

impl std::fmt::Debug for ApprovalGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalGate")
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_resolve_wakes_waiter() {
        let gate = ApprovalGate::default();
        let task_id = Uuid::new_v4();
        let rx = gate.register(task_id).await;
        assert_eq!(gate.pending().await, vec![task_id]);

        assert!(gate.resolve(task_id, true).await);
        assert_eq!(gate.wait(task_id, rx).await, ApprovalDecision::Approved);
        assert!(gate.pending().await.is_empty());
    }

    #[tokio::test]
    async fn test_early_decision_is_kept() {
        let gate = ApprovalGate::default();
        let task_id = Uuid::new_v4();
        assert!(!gate.resolve(task_id, false).await);

        let rx = gate.register(task_id).await;
        assert_eq!(gate.wait(task_id, rx).await, ApprovalDecision::Rejected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_decision_expires() {
        let gate = ApprovalGate::new(Duration::from_secs(300));
        let task_id = Uuid::new_v4();
        let rx = gate.register(task_id).await;

        let start = tokio::time::Instant::now();
        let decision = gate.wait(task_id, rx).await;
        assert_eq!(decision, ApprovalDecision::Expired);
        assert!(!decision.is_approved());
        assert!(start.elapsed() >= Duration::from_secs(300));
        assert!(gate.pending().await.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_after_waiter_dropped_is_buffered() {
        let gate = ApprovalGate::default();
        let task_id = Uuid::new_v4();
        drop(gate.register(task_id).await);

        assert!(!gate.resolve(task_id, true).await);
        let rx = gate.register(task_id).await;
        assert_eq!(gate.wait(task_id, rx).await, ApprovalDecision::Approved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forget_discards_buffered_decision() {
        let gate = ApprovalGate::new(Duration::from_secs(5));
        let task_id = Uuid::new_v4();
        assert!(!gate.resolve(task_id, true).await);

        gate.forget(task_id).await;
        let rx = gate.register(task_id).await;
        assert_eq!(gate.wait(task_id, rx).await, ApprovalDecision::Expired);
    }
}
