use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::PoolError;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

lazy_static::lazy_static! {
  static ref NEXT_TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

pub(crate) const NO_BODY_ERROR: &str = "No function set for task";
pub(crate) const UNKNOWN_PANIC_ERROR: &str = "Unknown error occurred";

/// The type of callable that the pool executes: a one-shot, no-output unit of
/// blocking work.
pub type TaskBody = Box<dyn FnOnce() + Send + 'static>;

/// Priority of a task. Workers always claim the highest-priority pending
/// task; the relative order among tasks of equal priority is unspecified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum TaskPriority {
  Low = 0,
  Normal = 1,
  High = 2,
}

impl Default for TaskPriority {
  fn default() -> Self {
    TaskPriority::Normal
  }
}

/// Lifecycle of a task. Transitions are one-directional:
/// `Created → Queued → Running → {Completed | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
  Created,
  Queued,
  Running,
  Completed,
  Failed,
}

struct TaskState {
  body: Option<TaskBody>,
  priority: TaskPriority,
  status: TaskStatus,
  error: Option<String>,
  started_at: Option<Instant>,
  finished_at: Option<Instant>,
}

/// A single unit of work with a priority, a body and a lifecycle status.
///
/// Tasks are reference counted: the submitter may keep its `Arc<Task>` to
/// inspect the outcome while the pool holds another clone for the queued and
/// running phases. All observers are safe to call from any thread; the pool
/// guarantees a task is executed by at most one worker.
pub struct Task {
  id: u64,
  state: Mutex<TaskState>,
}

impl Task {
  /// Creates a task with `Normal` priority.
  pub fn new<F>(body: F) -> Arc<Self>
  where
    F: FnOnce() + Send + 'static,
  {
    Self::with_priority(body, TaskPriority::Normal)
  }

  /// Creates a task with an explicit priority.
  pub fn with_priority<F>(body: F, priority: TaskPriority) -> Arc<Self>
  where
    F: FnOnce() + Send + 'static,
  {
    Arc::new(Self {
      id: NEXT_TASK_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed),
      state: Mutex::new(TaskState {
        body: Some(Box::new(body)),
        priority,
        status: TaskStatus::Created,
        error: None,
        started_at: None,
        finished_at: None,
      }),
    })
  }

  /// Creates a task with no body. Executing it fails immediately with a
  /// fixed error message; useful as an explicit failure probe.
  pub fn empty() -> Arc<Self> {
    Arc::new(Self {
      id: NEXT_TASK_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed),
      state: Mutex::new(TaskState {
        body: None,
        priority: TaskPriority::Normal,
        status: TaskStatus::Created,
        error: None,
        started_at: None,
        finished_at: None,
      }),
    })
  }

  /// Returns the unique ID of this task.
  pub fn id(&self) -> u64 {
    self.id
  }

  /// Replaces the body. Allowed only while the task is still `Created`;
  /// afterwards the call is ignored with a logged warning.
  pub fn set_body<F>(&self, body: F)
  where
    F: FnOnce() + Send + 'static,
  {
    let mut state = self.state.lock();
    if state.status != TaskStatus::Created {
      warn!(task_id = %self.id, "Cannot set body after task has been queued or started");
      return;
    }
    state.body = Some(Box::new(body));
  }

  /// Changes the priority. Allowed only while the task is still `Created`;
  /// afterwards the call is ignored with a logged warning.
  pub fn set_priority(&self, priority: TaskPriority) {
    let mut state = self.state.lock();
    if state.status != TaskStatus::Created {
      warn!(task_id = %self.id, "Cannot change priority after task has been queued or started");
      return;
    }
    state.priority = priority;
  }

  pub fn priority(&self) -> TaskPriority {
    self.state.lock().priority
  }

  pub fn status(&self) -> TaskStatus {
    self.state.lock().status
  }

  /// The captured error message, present once the task has `Failed`.
  pub fn error_message(&self) -> Option<String> {
    self.state.lock().error.clone()
  }

  /// Wall-clock duration of the body run. Zero until the task reaches
  /// `Completed` or `Failed`, and zero for failures that never started
  /// (a task with no body records no timestamps).
  pub fn execution_time(&self) -> Duration {
    let state = self.state.lock();
    match state.status {
      TaskStatus::Completed | TaskStatus::Failed => match (state.started_at, state.finished_at) {
        (Some(started), Some(finished)) => finished.duration_since(started),
        _ => Duration::ZERO,
      },
      _ => Duration::ZERO,
    }
  }

  /// Transitions `Created → Queued`, snapshotting the priority the queue
  /// will order by. Fails if the task already left `Created`.
  pub(crate) fn mark_queued(&self) -> Result<TaskPriority, PoolError> {
    let mut state = self.state.lock();
    if state.status != TaskStatus::Created {
      return Err(PoolError::TaskAlreadySubmitted);
    }
    state.status = TaskStatus::Queued;
    Ok(state.priority)
  }

  /// Runs the task to a terminal state.
  ///
  /// With no body set, the task transitions straight to `Failed` with a
  /// fixed message. Otherwise it transitions to `Running`, records the start
  /// timestamp and invokes the body with the state lock released, so
  /// observers never block on a running body. A normal return yields
  /// `Completed`; a panic is caught, its payload converted into a
  /// human-readable message and the task ends `Failed`. `execute` never
  /// propagates a panic to its caller.
  pub fn execute(&self) {
    let body = {
      let mut state = self.state.lock();
      match state.status {
        TaskStatus::Created | TaskStatus::Queued => {}
        other => {
          warn!(task_id = %self.id, status = ?other, "Cannot execute a task that has already run");
          return;
        }
      }
      match state.body.take() {
        Some(body) => {
          state.status = TaskStatus::Running;
          state.started_at = Some(Instant::now());
          body
        }
        None => {
          state.error = Some(NO_BODY_ERROR.to_string());
          state.status = TaskStatus::Failed;
          drop(state);
          debug!(task_id = %self.id, "Task failed: {}", NO_BODY_ERROR);
          return;
        }
      }
    };

    trace!(task_id = %self.id, "Task started.");

    let outcome = catch_unwind(AssertUnwindSafe(body));

    let mut state = self.state.lock();
    state.finished_at = Some(Instant::now());
    match outcome {
      Ok(()) => {
        state.status = TaskStatus::Completed;
        drop(state);
        trace!(task_id = %self.id, "Task finished.");
      }
      Err(payload) => {
        let message = panic_message(payload.as_ref());
        state.error = Some(message.clone());
        state.status = TaskStatus::Failed;
        drop(state);
        debug!(task_id = %self.id, "Task failed: {}", message);
      }
    }
  }
}

impl fmt::Debug for Task {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.state.lock();
    f.debug_struct("Task")
      .field("id", &self.id)
      .field("priority", &state.priority)
      .field("status", &state.status)
      .finish_non_exhaustive()
  }
}

/// Renders a panic payload as a message. Payloads that are neither `&str`
/// nor `String` get a generic message.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    UNKNOWN_PANIC_ERROR.to_string()
  }
}
