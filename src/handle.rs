use crate::task::{Task, TaskPriority, TaskStatus};

use std::sync::Arc;
use std::time::Duration;

/// A handle to a task submitted to the [`ThreadPoolManager`](crate::ThreadPoolManager).
///
/// The handle shares ownership of the task with the pool, allowing the
/// submitter to inspect the outcome (status, error message, execution
/// duration) at any point after submission. It carries no cancellation
/// surface: once a task is claimed by a worker it runs to completion.
#[derive(Debug, Clone)]
pub struct TaskHandle {
  pub(crate) task: Arc<Task>,
}

impl TaskHandle {
  /// Returns the unique ID of this task.
  pub fn id(&self) -> u64 {
    self.task.id()
  }

  pub fn priority(&self) -> TaskPriority {
    self.task.priority()
  }

  pub fn status(&self) -> TaskStatus {
    self.task.status()
  }

  /// The error captured by a failed run, if any.
  pub fn error_message(&self) -> Option<String> {
    self.task.error_message()
  }

  /// Duration of the body run; zero until the task reaches a terminal state.
  pub fn execution_time(&self) -> Duration {
    self.task.execution_time()
  }

  /// A clone of the underlying shared task.
  pub fn task(&self) -> Arc<Task> {
    self.task.clone()
  }
}
