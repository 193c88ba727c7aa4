use crate::error::PoolError;
use crate::handle::TaskHandle;
use crate::notifier::{CompletionNotifier, PoolEvent};
use crate::task::{panic_message, Task, TaskStatus};
use crate::task_queue::TaskQueue;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, trace, warn};

/// Queue and running flag live under the one mutex; the condvar signals
/// workers when either changes.
struct PoolState {
  queue: TaskQueue,
  running: bool,
}

struct PoolShared {
  state: Mutex<PoolState>,
  work_available: Condvar,
  active_workers: AtomicUsize,
}

/// A fixed-size pool of worker threads executing prioritized blocking tasks.
///
/// Submitters hand over an `Arc<Task>`; one waiting worker is woken per
/// submission and workers always claim the highest-priority pending task.
/// Task bodies run outside the pool's lock, and any failure they raise is
/// absorbed into the task's own state rather than the worker thread.
/// Dropping the manager performs an implicit [`shutdown`](Self::shutdown),
/// so no worker ever outlives it.
pub struct ThreadPoolManager {
  pool_name: Arc<String>,
  shared: Arc<PoolShared>,
  worker_handles: Mutex<Vec<JoinHandle<()>>>,
  events_tx: Mutex<Option<Sender<PoolEvent>>>,
  notifier: Arc<CompletionNotifier>,
}

impl ThreadPoolManager {
  /// Starts a pool with `thread_count` workers.
  ///
  /// A zero `thread_count` is a configuration error: it is reported through
  /// the pool-error channel and the pool is left with no workers and
  /// `running == false`, so every subsequent `submit` is rejected.
  /// Construction itself never fails.
  pub fn new(thread_count: usize, pool_name: &str) -> Self {
    let pool_name = Arc::new(pool_name.to_string());
    let (events_tx, events_rx) = crossbeam_channel::unbounded();
    let notifier = CompletionNotifier::new(events_rx, pool_name.clone());

    let shared = Arc::new(PoolShared {
      state: Mutex::new(PoolState {
        queue: TaskQueue::new(),
        running: thread_count > 0,
      }),
      work_available: Condvar::new(),
      active_workers: AtomicUsize::new(0),
    });

    let manager = Self {
      pool_name: pool_name.clone(),
      shared: shared.clone(),
      worker_handles: Mutex::new(Vec::new()),
      events_tx: Mutex::new(Some(events_tx.clone())),
      notifier,
    };

    if thread_count == 0 {
      manager.report_pool_error(&PoolError::InvalidThreadCount(thread_count));
      return manager;
    }

    let mut handles = Vec::with_capacity(thread_count);
    for worker_id in 0..thread_count {
      let worker_pool_name = pool_name.clone();
      let worker_shared = shared.clone();
      let worker_events = events_tx.clone();

      let spawn_result = std::thread::Builder::new()
        .name(format!("{}-worker-{}", pool_name, worker_id))
        .spawn(move || {
          Self::run_worker_loop(worker_id, worker_pool_name, worker_shared, worker_events);
        });

      match spawn_result {
        Ok(handle) => handles.push(handle),
        Err(e) => manager.report_pool_error(&PoolError::WorkerSpawnFailed(e.to_string())),
      }
    }

    if handles.is_empty() {
      // Every spawn failed; nothing can ever drain the queue.
      shared.state.lock().running = false;
    }

    info!(pool_name = %*manager.pool_name, thread_count = handles.len(), "Thread pool started.");
    *manager.worker_handles.lock() = handles;

    manager
  }

  /// Starts a pool sized to the host's reported parallelism.
  pub fn with_default_parallelism(pool_name: &str) -> Self {
    Self::new(num_cpus::get(), pool_name)
  }

  pub fn name(&self) -> &str {
    &self.pool_name
  }

  pub fn is_running(&self) -> bool {
    self.shared.state.lock().running
  }

  /// Point-in-time count of tasks waiting in the queue.
  pub fn queued_task_count(&self) -> usize {
    self.shared.state.lock().queue.len()
  }

  /// Number of workers currently executing a task.
  pub fn active_task_count(&self) -> usize {
    self.shared.active_workers.load(AtomicOrdering::SeqCst)
  }

  /// Number of worker threads still tracked by the pool. Decreases as
  /// workers are joined during shutdown.
  pub fn thread_count(&self) -> usize {
    self.worker_handles.lock().len()
  }

  /// Registers a handler for pool events (task completions, task failures
  /// and pool errors). Handlers run on a dedicated notification thread,
  /// never under the pool's internal lock.
  pub fn add_completion_handler(&self, handler: impl Fn(PoolEvent) + Send + Sync + 'static) {
    self.notifier.add_handler(handler);
  }

  /// Enqueues a task and wakes one waiting worker.
  ///
  /// Rejects tasks when the pool is not running, and tasks that have already
  /// been submitted (their status left `Created`). Both rejections are
  /// reported through the pool-error channel as well as the `Err` return,
  /// and leave the queue untouched. Safe to call concurrently from any
  /// number of submitter threads; the caller never blocks beyond the
  /// enqueue critical section.
  pub fn submit(&self, task: Arc<Task>) -> Result<TaskHandle, PoolError> {
    let mut state = self.shared.state.lock();

    if !state.running {
      drop(state);
      warn!(pool_name = %*self.pool_name, task_id = %task.id(), "Submit: Attempted to submit task to a pool that is not running.");
      self.report_pool_error(&PoolError::PoolNotRunning);
      return Err(PoolError::PoolNotRunning);
    }

    let priority = match task.mark_queued() {
      Ok(priority) => priority,
      Err(err) => {
        drop(state);
        warn!(pool_name = %*self.pool_name, task_id = %task.id(), "Submit: Task has already been submitted.");
        self.report_pool_error(&err);
        return Err(err);
      }
    };

    state.queue.push(task.clone(), priority);
    self.shared.work_available.notify_one();
    drop(state);

    debug!(pool_name = %*self.pool_name, task_id = %task.id(), priority = ?priority, "Submitted task to queue.");
    Ok(TaskHandle { task })
  }

  /// Stops the pool and blocks until every worker thread has exited.
  ///
  /// New submissions are rejected from the moment the running flag drops.
  /// Workers finish their in-flight task naturally; queued tasks that were
  /// never claimed are abandoned. Calling `shutdown` again is safe: it
  /// observes the flag already lowered and has no workers left to join.
  pub fn shutdown(&self) {
    let was_running = {
      let mut state = self.shared.state.lock();
      let was_running = state.running;
      state.running = false;
      was_running
    };

    if was_running {
      info!(pool_name = %*self.pool_name, "Initiating explicit pool shutdown.");
    } else {
      debug!(pool_name = %*self.pool_name, "Shutdown already initiated by an earlier call or Drop.");
    }
    self.shared.work_available.notify_all();

    // Join one handle at a time, outside the lock; a handle leaves the
    // collection only once its thread has fully exited.
    loop {
      let handle = self.worker_handles.lock().pop();
      match handle {
        Some(handle) => {
          let worker = handle.thread().name().map(str::to_string);
          if handle.join().is_err() {
            error!(pool_name = %*self.pool_name, worker = ?worker, "Worker thread panicked before exiting.");
          } else {
            trace!(pool_name = %*self.pool_name, worker = ?worker, "Worker thread joined.");
          }
        }
        None => break,
      }
    }

    let abandoned = {
      let mut state = self.shared.state.lock();
      let abandoned = state.queue.len();
      state.queue.clear();
      abandoned
    };
    if abandoned > 0 {
      warn!(pool_name = %*self.pool_name, abandoned, "Shutdown abandoned queued tasks that were never claimed.");
    }

    if was_running {
      info!(pool_name = %*self.pool_name, "Pool shutdown process completed by this call.");
    }
  }

  fn report_pool_error(&self, error: &PoolError) {
    error!(pool_name = %*self.pool_name, "Pool error: {}", error);
    let events_tx = self.events_tx.lock();
    if let Some(tx) = events_tx.as_ref() {
      let _ = tx.send(PoolEvent::PoolError {
        message: error.to_string(),
      });
    }
  }

  fn run_worker_loop(
    worker_id: usize,
    pool_name: Arc<String>,
    shared: Arc<PoolShared>,
    events: Sender<PoolEvent>,
  ) {
    info!(pool_name = %*pool_name, worker_id, "Worker loop started.");

    loop {
      let task = {
        let mut state = shared.state.lock();
        // Re-checked after every wake; a spurious wakeup with nothing to do
        // re-blocks here.
        while state.running && state.queue.is_empty() {
          shared.work_available.wait(&mut state);
        }
        if !state.running {
          break;
        }
        match state.queue.pop_highest() {
          Some(task) => task,
          None => continue,
        }
      };

      trace!(pool_name = %*pool_name, worker_id, task_id = %task.id(), "Claimed task.");
      shared.active_workers.fetch_add(1, AtomicOrdering::SeqCst);

      // Defensive boundary: `execute` converts body failures into task
      // state, and anything that still escapes it is caught here so a
      // single task can never take the worker thread down.
      let guarded = catch_unwind(AssertUnwindSafe(|| task.execute()));

      match guarded {
        Ok(()) => match task.status() {
          TaskStatus::Completed => {
            debug!(
              pool_name = %*pool_name,
              worker_id,
              task_id = %task.id(),
              execution_ms = task.execution_time().as_millis() as u64,
              "Task completed."
            );
            let _ = events.send(PoolEvent::TaskCompleted { task: task.clone() });
          }
          TaskStatus::Failed => {
            let error = task.error_message().unwrap_or_default();
            debug!(pool_name = %*pool_name, worker_id, task_id = %task.id(), %error, "Task failed.");
            let _ = events.send(PoolEvent::TaskFailed {
              task: task.clone(),
              error,
            });
          }
          other => {
            warn!(pool_name = %*pool_name, worker_id, task_id = %task.id(), status = ?other, "Task left execute() in a non-terminal state.");
          }
        },
        Err(payload) => {
          let error = panic_message(payload.as_ref());
          error!(pool_name = %*pool_name, worker_id, task_id = %task.id(), %error, "Failure escaped task execution; worker absorbed it.");
          let _ = events.send(PoolEvent::TaskFailed {
            task: task.clone(),
            error,
          });
        }
      }

      shared.active_workers.fetch_sub(1, AtomicOrdering::SeqCst);
    }

    info!(pool_name = %*pool_name, worker_id, "Worker loop terminating; shutdown signal observed.");
  }
}

impl Drop for ThreadPoolManager {
  fn drop(&mut self) {
    if self.is_running() {
      info!(pool_name = %*self.pool_name, "ThreadPoolManager instance dropped. Initiating implicit shutdown.");
    }
    self.shutdown();

    // Dropping the last event sender lets the notification worker drain its
    // channel and exit; workers released their clones when they terminated.
    self.events_tx.lock().take();
    self.notifier.await_shutdown();
  }
}
