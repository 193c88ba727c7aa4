use crate::task::{Task, TaskPriority};

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Arc;

/// A pending task paired with the priority snapshotted at enqueue time.
///
/// The snapshot cannot go stale: priority is immutable once a task leaves
/// `Created`, which happens before or atomically with insertion.
struct QueueEntry {
  task: Arc<Task>,
  priority: TaskPriority,
}

impl PartialEq for QueueEntry {
  fn eq(&self, other: &Self) -> bool {
    self.priority == other.priority
  }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
  fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
    Some(self.cmp(other))
  }
}

impl Ord for QueueEntry {
  fn cmp(&self, other: &Self) -> CmpOrdering {
    self.priority.cmp(&other.priority)
  }
}

/// The pool's pending-task container.
///
/// A max-heap keyed by priority alone: `pop_highest` always yields a task of
/// the numerically greatest pending priority, while the order among tasks of
/// equal priority is unspecified. Claiming removes by heap position, so task
/// identity never enters an equality comparison. The queue is not internally
/// locked; the manager guards it together with the running flag under the
/// pool's single mutex.
pub(crate) struct TaskQueue {
  heap: BinaryHeap<QueueEntry>,
}

impl TaskQueue {
  pub(crate) fn new() -> Self {
    Self {
      heap: BinaryHeap::new(),
    }
  }

  pub(crate) fn push(&mut self, task: Arc<Task>, priority: TaskPriority) {
    self.heap.push(QueueEntry { task, priority });
  }

  /// Claims a pending task of the highest priority, or `None` if the queue
  /// is empty.
  pub(crate) fn pop_highest(&mut self) -> Option<Arc<Task>> {
    self.heap.pop().map(|entry| entry.task)
  }

  pub(crate) fn len(&self) -> usize {
    self.heap.len()
  }

  pub(crate) fn is_empty(&self) -> bool {
    self.heap.is_empty()
  }

  /// Drops every pending task. Used when the pool shuts down and abandons
  /// work it never claimed.
  pub(crate) fn clear(&mut self) {
    self.heap.clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn noop_task(priority: TaskPriority) -> Arc<Task> {
    Task::with_priority(|| {}, priority)
  }

  #[test]
  fn test_pop_highest_orders_by_priority() {
    let mut queue = TaskQueue::new();
    queue.push(noop_task(TaskPriority::Low), TaskPriority::Low);
    queue.push(noop_task(TaskPriority::High), TaskPriority::High);
    queue.push(noop_task(TaskPriority::Normal), TaskPriority::Normal);
    queue.push(noop_task(TaskPriority::High), TaskPriority::High);

    assert_eq!(queue.len(), 4);
    assert_eq!(queue.pop_highest().unwrap().priority(), TaskPriority::High);
    assert_eq!(queue.pop_highest().unwrap().priority(), TaskPriority::High);
    assert_eq!(queue.pop_highest().unwrap().priority(), TaskPriority::Normal);
    assert_eq!(queue.pop_highest().unwrap().priority(), TaskPriority::Low);
    assert!(queue.pop_highest().is_none());
  }

  #[test]
  fn test_pop_highest_on_empty_queue() {
    let mut queue = TaskQueue::new();
    assert!(queue.is_empty());
    assert!(queue.pop_highest().is_none());
  }

  #[test]
  fn test_clear_drops_pending_tasks() {
    let mut queue = TaskQueue::new();
    queue.push(noop_task(TaskPriority::Normal), TaskPriority::Normal);
    queue.push(noop_task(TaskPriority::Low), TaskPriority::Low);

    queue.clear();
    assert!(queue.is_empty());
    assert_eq!(queue.len(), 0);
  }

  #[test]
  fn test_distinct_tasks_of_equal_priority_are_both_claimed() {
    // Two distinct tasks compare equal by priority; claiming must still
    // yield each exactly once.
    let mut queue = TaskQueue::new();
    let first = noop_task(TaskPriority::Normal);
    let second = noop_task(TaskPriority::Normal);
    queue.push(first.clone(), TaskPriority::Normal);
    queue.push(second.clone(), TaskPriority::Normal);

    let a = queue.pop_highest().unwrap();
    let b = queue.pop_highest().unwrap();
    assert!(queue.is_empty());
    assert_ne!(a.id(), b.id());
    let claimed: Vec<u64> = vec![a.id(), b.id()];
    assert!(claimed.contains(&first.id()));
    assert!(claimed.contains(&second.id()));
  }
}
