use thread_orchestra::{PoolEvent, Task, TaskStatus, ThreadPoolManager};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

// Helper to initialize tracing for tests.
fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter =
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,thread_orchestra=trace"));
    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

// Helper for collecting notifications in tests.
fn create_collecting_handler() -> (Receiver<PoolEvent>, impl Fn(PoolEvent) + Send + Sync + 'static) {
  let (tx, rx) = crossbeam_channel::unbounded();
  let handler = move |event: PoolEvent| {
    tracing::debug!("Test Collecting Handler (Notifier Test): Received event: {:?}", event);
    let _ = tx.send(event);
  };
  (rx, handler)
}

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn test_completion_notifier_success() {
  setup_tracing_for_test();
  let manager = ThreadPoolManager::new(2, "test_notifier_success");
  let (events, handler) = create_collecting_handler();
  manager.add_completion_handler(handler);

  let handle = manager.submit(Task::new(|| {})).unwrap();

  match events.recv_timeout(EVENT_TIMEOUT).unwrap() {
    PoolEvent::TaskCompleted { task } => {
      assert_eq!(task.id(), handle.id());
      assert_eq!(task.status(), TaskStatus::Completed);
    }
    other => panic!("Expected TaskCompleted event, got {:?}", other),
  }

  manager.shutdown();
}

#[test]
fn test_completion_notifier_failure_carries_message() {
  setup_tracing_for_test();
  let manager = ThreadPoolManager::new(1, "test_notifier_failure");
  let (events, handler) = create_collecting_handler();
  manager.add_completion_handler(handler);

  let handle = manager.submit(Task::new(|| panic!("notifier test boom"))).unwrap();

  match events.recv_timeout(EVENT_TIMEOUT).unwrap() {
    PoolEvent::TaskFailed { task, error } => {
      assert_eq!(task.id(), handle.id());
      assert_eq!(error, "notifier test boom");
      assert_eq!(task.error_message().as_deref(), Some("notifier test boom"));
    }
    other => panic!("Expected TaskFailed event, got {:?}", other),
  }

  manager.shutdown();
}

#[test]
fn test_panicking_handler_does_not_kill_dispatcher() {
  setup_tracing_for_test();
  let manager = ThreadPoolManager::new(1, "test_notifier_handler_panic");

  let panics = Arc::new(AtomicUsize::new(0));
  let panics_clone = panics.clone();
  manager.add_completion_handler(move |_event| {
    panics_clone.fetch_add(1, Ordering::SeqCst);
    panic!("handler intentionally panicked");
  });
  let (events, handler) = create_collecting_handler();
  manager.add_completion_handler(handler);

  let first = manager.submit(Task::new(|| {})).unwrap();
  match events.recv_timeout(EVENT_TIMEOUT).unwrap() {
    PoolEvent::TaskCompleted { task } => assert_eq!(task.id(), first.id()),
    other => panic!("Expected TaskCompleted event, got {:?}", other),
  }

  // The dispatcher survived the panicking handler and keeps delivering.
  let second = manager.submit(Task::new(|| {})).unwrap();
  match events.recv_timeout(EVENT_TIMEOUT).unwrap() {
    PoolEvent::TaskCompleted { task } => assert_eq!(task.id(), second.id()),
    other => panic!("Expected TaskCompleted event, got {:?}", other),
  }

  assert_eq!(panics.load(Ordering::SeqCst), 2);
  manager.shutdown();
}

#[test]
fn test_handler_added_late_receives_buffered_events() {
  setup_tracing_for_test();
  let manager = ThreadPoolManager::new(1, "test_notifier_late_handler");

  let handle = manager.submit(Task::new(|| {})).unwrap();
  let deadline = Instant::now() + EVENT_TIMEOUT;
  while handle.status() != TaskStatus::Completed && Instant::now() < deadline {
    std::thread::sleep(Duration::from_millis(5));
  }
  assert_eq!(handle.status(), TaskStatus::Completed);

  // No handler existed while the task ran; the event sat in the channel and
  // must be delivered once the first handler arrives.
  let (events, handler) = create_collecting_handler();
  manager.add_completion_handler(handler);

  match events.recv_timeout(EVENT_TIMEOUT).unwrap() {
    PoolEvent::TaskCompleted { task } => assert_eq!(task.id(), handle.id()),
    other => panic!("Expected TaskCompleted event, got {:?}", other),
  }

  manager.shutdown();
}

#[test]
fn test_multiple_handlers_receive_each_event() {
  setup_tracing_for_test();
  let manager = ThreadPoolManager::new(1, "test_notifier_multiple_handlers");

  let (events_a, handler_a) = create_collecting_handler();
  let (events_b, handler_b) = create_collecting_handler();
  manager.add_completion_handler(handler_a);
  manager.add_completion_handler(handler_b);

  let handle = manager.submit(Task::new(|| {})).unwrap();

  for events in [&events_a, &events_b] {
    match events.recv_timeout(EVENT_TIMEOUT).unwrap() {
      PoolEvent::TaskCompleted { task } => assert_eq!(task.id(), handle.id()),
      other => panic!("Expected TaskCompleted event, got {:?}", other),
    }
  }

  manager.shutdown();
}
