//! Priority queue of dependency-ready subtasks.

use crate::task::SubtaskId;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    task_priority: u8,
    priority: u8,
    seq: u64,
    subtask_id: SubtaskId,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.task_priority
            .cmp(&other.task_priority)
            .then(self.priority.cmp(&other.priority))
            // Earlier enqueue wins
            .then(other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Ordered by task priority, then subtask priority (both highest first),
/// then enqueue order.
#[derive(Debug, Default)]
pub struct ReadyQueue {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
}

impl ReadyQueue {
    /// Empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue with a fresh sequence number; returns it.
    pub fn push(&mut self, subtask_id: SubtaskId, task_priority: u8, priority: u8) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.push_with_seq(subtask_id, task_priority, priority, seq);
        seq
    }

    /// Re-enqueue keeping an earlier sequence number.
    pub fn push_with_seq(&mut self, subtask_id: SubtaskId, task_priority: u8, priority: u8, seq: u64) {
        self.heap.push(Entry {
            task_priority,
            priority,
            seq,
            subtask_id,
        });
    }

    /// Highest-ordered subtask and its sequence number.
    pub fn pop(&mut self) -> Option<(SubtaskId, u64)> {
        self.heap.pop().map(|e| (e.subtask_id, e.seq))
    }

    /// Remove everything, highest first.
    pub fn drain(&mut self) -> Vec<SubtaskId> {
        let mut out = Vec::with_capacity(self.heap.len());
        while let Some((id, _)) = self.pop() {
            out.push(id);
        }
        out
    }

    /// Queued subtasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_ordering() {
        let mut q = ReadyQueue::new();
        let low = Uuid::new_v4();
        let high = Uuid::new_v4();
        let first_mid = Uuid::new_v4();
        let second_mid = Uuid::new_v4();
        q.push(low, 5, 1);
        q.push(first_mid, 5, 5);
        q.push(second_mid, 5, 5);
        q.push(high, 5, 9);

        let order: Vec<SubtaskId> = q.drain();
        assert_eq!(order, vec![high, first_mid, second_mid, low]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_task_priority_dominates() {
        let mut q = ReadyQueue::new();
        let urgent = Uuid::new_v4();
        let normal = Uuid::new_v4();
        q.push(normal, 5, 10);
        q.push(urgent, 9, 1);
        assert_eq!(q.pop().map(|(id, _)| id), Some(urgent));
    }

    #[test]
    fn test_requeue_keeps_place() {
        let mut q = ReadyQueue::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let seq_a = q.push(a, 5, 5);
        q.push(b, 5, 5);
        let (popped, seq) = q.pop().unwrap();
        assert_eq!((popped, seq), (a, seq_a));
        q.push_with_seq(a, 5, 5, seq_a);
        assert_eq!(q.pop().map(|(id, _)| id), Some(a));
    }
}
