use crate::task::Task;

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex as StdMutex, Once, RwLock};
use std::thread::JoinHandle;

use crossbeam_channel::Receiver;
use tracing::{debug, error, info, trace, warn};

/// A pool-level notification delivered to registered completion handlers.
///
/// Workers emit `TaskCompleted`/`TaskFailed` after each claimed task reaches
/// a terminal state; the pool emits `PoolError` for configuration and
/// submission failures. Delivery is asynchronous and never happens while the
/// pool's internal lock is held.
#[derive(Debug, Clone)]
pub enum PoolEvent {
  TaskCompleted { task: Arc<Task> },
  TaskFailed { task: Arc<Task>, error: String },
  PoolError { message: String },
}

struct NotifierInternalState {
  internal_rx_for_init: Option<Receiver<PoolEvent>>,
  pool_name_for_logging: Arc<String>,
  worker_join_handle: Option<JoinHandle<()>>,
}

type HandlerList = Arc<RwLock<Vec<Arc<dyn Fn(PoolEvent) + Send + Sync + 'static>>>>;

/// Fans pool events out to registered handlers from a dedicated dispatcher
/// thread, so a slow or panicking handler never stalls a worker.
pub(crate) struct CompletionNotifier {
  handlers: HandlerList,
  init_once: Once,
  internal_state_for_init: StdMutex<NotifierInternalState>,
}

impl fmt::Debug for CompletionNotifier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let handler_count = self.handlers.try_read().map_or(0, |guard| guard.len());
    f.debug_struct("CompletionNotifier")
      .field("handler_count", &handler_count)
      .field("initialized", &self.init_once.is_completed())
      .finish_non_exhaustive()
  }
}

impl CompletionNotifier {
  pub(crate) fn new(internal_rx: Receiver<PoolEvent>, pool_name_for_logging: Arc<String>) -> Arc<Self> {
    Arc::new(Self {
      handlers: Arc::new(RwLock::new(Vec::new())),
      init_once: Once::new(),
      internal_state_for_init: StdMutex::new(NotifierInternalState {
        internal_rx_for_init: Some(internal_rx),
        pool_name_for_logging,
        worker_join_handle: None,
      }),
    })
  }

  /// Starts the dispatcher thread the first time a handler is added. Until
  /// then, events accumulate in the channel and are drained on startup.
  fn ensure_worker_initialized(&self) {
    self.init_once.call_once(|| {
      let mut state_guard = self.internal_state_for_init.lock().unwrap();
      if let Some(rx_to_use) = state_guard.internal_rx_for_init.take() {
        info!(pool_name = %*state_guard.pool_name_for_logging, "First completion handler added. Initializing notification worker.");

        let worker_handlers = self.handlers.clone();
        let worker_pool_name = state_guard.pool_name_for_logging.clone();

        let worker_jh = std::thread::Builder::new()
          .name(format!("{}-notifier", state_guard.pool_name_for_logging))
          .spawn(move || {
            Self::run_notification_worker_loop(rx_to_use, worker_handlers, worker_pool_name);
          });

        match worker_jh {
          Ok(handle) => state_guard.worker_join_handle = Some(handle),
          Err(e) => {
            error!(pool_name = %*state_guard.pool_name_for_logging, "Failed to spawn notification worker: {}", e);
          }
        }
      } else {
        warn!(pool_name = %*state_guard.pool_name_for_logging, "Notifier initialization: RX already taken, worker might have been initialized concurrently (unexpected with Once).");
      }
    });
  }

  pub(crate) fn add_handler(&self, handler: impl Fn(PoolEvent) + Send + Sync + 'static) {
    // Register before starting the dispatcher, so events buffered ahead of
    // the first handler are delivered to it rather than dropped.
    let handler_count = {
      let mut handlers_guard = self.handlers.write().unwrap();
      handlers_guard.push(Arc::new(handler));
      handlers_guard.len()
    };
    self.ensure_worker_initialized();

    let pool_name_for_logging = {
      let state_guard = self.internal_state_for_init.lock().unwrap();
      state_guard.pool_name_for_logging.clone()
    };
    info!(pool_name = %*pool_name_for_logging, "Notifier: Added new completion handler. Total handlers: {}", handler_count);
  }

  fn run_notification_worker_loop(queue_rx: Receiver<PoolEvent>, handlers_list: HandlerList, pool_name: Arc<String>) {
    info!(pool_name = %*pool_name, "Notification worker started. Will process events until its input channel is closed by all senders.");

    // recv() fails only once the channel is closed AND empty, so the loop
    // drains every event emitted before shutdown completed.
    while let Ok(event) = queue_rx.recv() {
      let handlers_guard = handlers_list.read().unwrap();
      if handlers_guard.is_empty() {
        trace!(pool_name = %*pool_name, "No completion handlers registered, dropping notification.");
        continue;
      }

      debug!(pool_name = %*pool_name, "Dispatching notification to {} handlers.", handlers_guard.len());

      for handler_arc in handlers_guard.iter() {
        let result = catch_unwind(AssertUnwindSafe(|| handler_arc(event.clone())));
        if result.is_err() {
          error!(pool_name = %*pool_name, "A completion handler panicked during execution.");
        }
      }
    }

    info!(pool_name = %*pool_name, "Notification worker stopped (input channel fully closed and drained).");
  }

  /// Joins the dispatcher thread, once every event sender has been dropped.
  pub(crate) fn await_shutdown(&self) {
    let (handle_option, pool_name) = {
      let mut guard = self.internal_state_for_init.lock().unwrap();
      let handle = guard.worker_join_handle.take();
      let name = guard.pool_name_for_logging.clone();
      (handle, name)
    };

    if let Some(handle) = handle_option {
      info!(pool_name = %*pool_name, "Notifier: Waiting for notification worker to join.");
      if handle.join().is_err() {
        error!(pool_name = %*pool_name, "Notifier: Notification worker panicked.");
      } else {
        debug!(pool_name = %*pool_name, "Notifier: Notification worker successfully joined.");
      }
    } else {
      trace!(pool_name = %*pool_name, "Notifier: Worker was not initialized or handle already taken; no join needed.");
    }
  }
}
