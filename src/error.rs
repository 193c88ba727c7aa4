use thiserror::Error;

/// Errors that can occur within the `thread_orchestra` pool.
///
/// These cover configuration and submission failures only. A failure raised
/// by a task's body is never a `PoolError`: it is absorbed into the task's
/// own state (`TaskStatus::Failed` plus a captured message) and surfaced as a
/// [`PoolEvent::TaskFailed`](crate::PoolEvent) notification.
#[derive(Error, Debug, PartialEq)]
pub enum PoolError {
  #[error("Pool requires at least one worker thread, got {0}")]
  InvalidThreadCount(usize),

  #[error("Pool is not running, cannot accept new tasks")]
  PoolNotRunning,

  #[error("Task has already been submitted to a pool")]
  TaskAlreadySubmitted,

  #[error("Failed to spawn worker thread: {0}")]
  WorkerSpawnFailed(String),
}
