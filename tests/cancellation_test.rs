//! Integration tests for cross-thread cancellation of blocked statements.

mod common;

use common::{Harness, numbers_database};
use db_exec::ExecError;
use db_exec::db::CancelHandle;
use db_exec::driver::RawConnection;
use db_exec::error::DriverErrorKind;
use db_exec::models::StatementOptions;
use db_exec::monitor::{BlockStack, BlockingObject, EventKind, ProgressTracker};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const SLOW_QUERY: &str = "SELECT pg_sleep(3600)";

fn blocking_harness() -> Harness {
    let db = numbers_database(1);
    db.register_blocking(SLOW_QUERY);
    Harness::new(db)
}

/// Keep cancelling until `done` is set. Cancels that arrive before the call is
/// blocked are no-ops, so retrying is safe.
fn keep_cancelling(cancel: impl Fn() + Send + 'static, done: Arc<AtomicBool>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while !done.load(Ordering::SeqCst) {
            cancel();
            thread::sleep(Duration::from_millis(10));
        }
    })
}

fn via_handle(handle: CancelHandle) -> impl Fn() + Send + 'static {
    move || handle.cancel_block().unwrap()
}

fn via_tracker(stack: Arc<BlockStack>) -> impl Fn() + Send + 'static {
    move || {
        stack.cancel_current().unwrap();
    }
}

#[test]
fn test_cancel_block_interrupts_blocked_query() {
    let harness = blocking_harness();
    let ctx = harness.context(false);
    let done = Arc::new(AtomicBool::new(false));
    let canceller = keep_cancelling(via_handle(ctx.cancel_handle()), done.clone());

    let mut stmt = ctx.create_statement(&StatementOptions::new()).unwrap();
    let result = stmt.execute_query(SLOW_QUERY);
    done.store(true, Ordering::SeqCst);
    canceller.join().unwrap();

    let err = result.err().unwrap();
    assert!(matches!(err, ExecError::Cancelled { .. }), "got {err:?}");
    assert_eq!(
        err.driver_error().map(|e| e.kind),
        Some(DriverErrorKind::ConnectionClosed)
    );
    // The captured error and the end notification still happen.
    assert!(stmt.last_error().is_some());
    assert_eq!(
        harness
            .monitor
            .count(|k| matches!(k, EventKind::ExecuteEnd { error: Some(_), .. })),
        1
    );
    // Cancellation works by closing the connection the call was blocked on.
    assert!(harness.source.shared_connection().is_closed());
    assert_eq!(harness.stack.depth(), 0);
    assert_eq!(harness.stack.started(), harness.stack.ended());
}

#[test]
fn test_tracker_cancels_innermost_block_owner() {
    let harness = blocking_harness();
    let ctx = harness.context(true);
    let done = Arc::new(AtomicBool::new(false));
    let canceller = keep_cancelling(via_tracker(harness.stack.clone()), done.clone());

    let mut stmt = ctx.create_statement(&StatementOptions::new()).unwrap();
    let result = stmt.execute(SLOW_QUERY);
    done.store(true, Ordering::SeqCst);
    canceller.join().unwrap();

    assert!(result.unwrap_err().is_cancellation());
    let isolated = harness.source.isolated_connections();
    assert_eq!(isolated.len(), 1);
    assert!(isolated[0].is_closed());
    // The shared connection was never touched.
    assert!(!harness.source.shared_connection().is_closed());
    ctx.close();
}

#[test]
fn test_failure_after_cancel_window_is_not_a_cancellation() {
    let harness = blocking_harness();
    let ctx = harness.context(false);
    // Nothing is running: the cancel is a no-op and leaves no pending flag.
    ctx.cancel_block().unwrap();
    let mut stmt = ctx.create_statement(&StatementOptions::new()).unwrap();
    let err = stmt.execute_query("SELECT unknown").err().unwrap();
    assert!(matches!(err, ExecError::Driver(_)));
    assert!(!harness.source.shared_connection().is_closed());
}

/// Tracker that cancels the owner the moment a block is announced.
#[derive(Default)]
struct CancelOnStart {
    cancelled: AtomicUsize,
    ended: AtomicUsize,
}

impl ProgressTracker for CancelOnStart {
    fn start_block(&self, owner: Arc<dyn BlockingObject>, label: Option<&str>) {
        if label == Some(SLOW_QUERY) {
            owner.cancel_block().unwrap();
            self.cancelled.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn end_block(&self) {
        self.ended.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_cancel_as_block_starts_is_not_lost() {
    let harness = blocking_harness();
    let tracker = Arc::new(CancelOnStart::default());
    let ctx = db_exec::ExecutionContext::builder(harness.source.clone())
        .monitor(harness.monitor.clone())
        .tracker(tracker.clone())
        .build()
        .unwrap();

    let mut stmt = ctx.create_statement(&StatementOptions::new()).unwrap();
    let started = Instant::now();
    let err = stmt.execute_query(SLOW_QUERY).err().unwrap();

    assert!(matches!(err, ExecError::Cancelled { .. }), "got {err:?}");
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(tracker.cancelled.load(Ordering::SeqCst), 1);
    assert_eq!(tracker.ended.load(Ordering::SeqCst), 1);
    assert!(harness.source.shared_connection().is_closed());
}
