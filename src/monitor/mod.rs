//! Execution monitoring.
//!
//! Contexts, statements and result fetchers report their lifecycle to an
//! [`ExecutionMonitor`]. Every hook has a no-op default so sinks implement
//! only what they care about.
//!
//! - [`TracingMonitor`]: turns events into `tracing` events
//! - [`RecordingMonitor`]: keeps events in memory for inspection
//! - [`NoopMonitor`]: discards everything
//!
//! Progress blocks and cancellation targeting live in [`progress`].

pub mod progress;

pub use progress::{BlockStack, BlockingObject, NoopTracker, ProgressTracker};

use crate::error::DriverError;
use crate::models::{StatementInfo, StatementKind, TransactionIsolation};
use crate::sync::lock;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Transaction-level event reported by a context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TransactionEvent {
    Commit,
    Rollback { savepoint: Option<String> },
    AutoCommit { enabled: bool },
    Isolation { level: TransactionIsolation },
    Savepoint { id: Option<i64>, name: Option<String> },
    ReleaseSavepoint { id: Option<i64>, name: Option<String> },
}

/// Receiver of lifecycle events.
pub trait ExecutionMonitor: Send + Sync {
    fn statement_opened(&self, _statement: &StatementInfo) {}

    fn execute_begin(&self, _statement: &StatementInfo) {}

    /// `update_count` is -1 when the execution failed before producing one.
    fn execute_end(&self, _statement: &StatementInfo, _update_count: i64, _error: Option<&DriverError>) {}

    fn statement_closed(&self, _statement: &StatementInfo) {}

    fn result_opened(&self, _statement: &StatementInfo) {}

    fn result_closed(&self, _statement: &StatementInfo, _rows_fetched: u64) {}

    fn transaction(&self, _context_id: Uuid, _event: &TransactionEvent) {}
}

/// Monitor that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMonitor;

impl ExecutionMonitor for NoopMonitor {}

/// Monitor writing every event to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMonitor;

impl ExecutionMonitor for TracingMonitor {
    fn statement_opened(&self, s: &StatementInfo) {
        debug!(target: "db_exec::monitor", context_id = %s.context_id, statement_id = s.id, kind = %s.kind, "Statement opened");
    }

    fn execute_begin(&self, s: &StatementInfo) {
        debug!(
            target: "db_exec::monitor",
            context_id = %s.context_id,
            statement_id = s.id,
            query = s.query.as_deref().unwrap_or(""),
            purpose = s.purpose.as_deref().unwrap_or(""),
            "Execute begin"
        );
    }

    fn execute_end(&self, s: &StatementInfo, update_count: i64, error: Option<&DriverError>) {
        match error {
            Some(err) => warn!(
                target: "db_exec::monitor",
                context_id = %s.context_id,
                statement_id = s.id,
                error = %err,
                sql_state = err.sql_state.as_deref().unwrap_or(""),
                "Execute failed"
            ),
            None => info!(
                target: "db_exec::monitor",
                context_id = %s.context_id,
                statement_id = s.id,
                update_count,
                "Execute end"
            ),
        }
    }

    fn statement_closed(&self, s: &StatementInfo) {
        debug!(target: "db_exec::monitor", context_id = %s.context_id, statement_id = s.id, "Statement closed");
    }

    fn result_opened(&self, s: &StatementInfo) {
        debug!(target: "db_exec::monitor", context_id = %s.context_id, statement_id = s.id, "Result opened");
    }

    fn result_closed(&self, s: &StatementInfo, rows_fetched: u64) {
        debug!(target: "db_exec::monitor", context_id = %s.context_id, statement_id = s.id, rows_fetched, "Result closed");
    }

    fn transaction(&self, context_id: Uuid, event: &TransactionEvent) {
        info!(target: "db_exec::monitor", context_id = %context_id, event = ?event, "Transaction event");
    }
}

/// What happened, as recorded by [`RecordingMonitor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    StatementOpened {
        statement_id: u64,
        kind: StatementKind,
    },
    ExecuteBegin {
        statement_id: u64,
        query: Option<String>,
    },
    ExecuteEnd {
        statement_id: u64,
        update_count: i64,
        error: Option<String>,
    },
    StatementClosed {
        statement_id: u64,
    },
    ResultOpened {
        statement_id: u64,
    },
    ResultClosed {
        statement_id: u64,
        rows_fetched: u64,
    },
    Transaction {
        context_id: Uuid,
        #[serde(flatten)]
        transaction: TransactionEvent,
    },
}

/// A recorded event with the time it was observed.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorEvent {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Monitor keeping every event in memory.
#[derive(Debug, Default)]
pub struct RecordingMonitor {
    events: Mutex<Vec<MonitorEvent>>,
}

impl RecordingMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MonitorEvent> {
        lock(&self.events).clone()
    }

    /// Recorded events without timestamps, oldest first.
    pub fn kinds(&self) -> Vec<EventKind> {
        lock(&self.events).iter().map(|e| e.kind.clone()).collect()
    }

    /// Number of recorded events matching `pred`.
    pub fn count(&self, pred: impl Fn(&EventKind) -> bool) -> usize {
        lock(&self.events).iter().filter(|e| pred(&e.kind)).count()
    }

    pub fn clear(&self) {
        lock(&self.events).clear();
    }

    fn record(&self, kind: EventKind) {
        lock(&self.events).push(MonitorEvent {
            at: Utc::now(),
            kind,
        });
    }
}

impl ExecutionMonitor for RecordingMonitor {
    fn statement_opened(&self, s: &StatementInfo) {
        self.record(EventKind::StatementOpened {
            statement_id: s.id,
            kind: s.kind,
        });
    }

    fn execute_begin(&self, s: &StatementInfo) {
        self.record(EventKind::ExecuteBegin {
            statement_id: s.id,
            query: s.query.clone(),
        });
    }

    fn execute_end(&self, s: &StatementInfo, update_count: i64, error: Option<&DriverError>) {
        self.record(EventKind::ExecuteEnd {
            statement_id: s.id,
            update_count,
            error: error.map(ToString::to_string),
        });
    }

    fn statement_closed(&self, s: &StatementInfo) {
        self.record(EventKind::StatementClosed { statement_id: s.id });
    }

    fn result_opened(&self, s: &StatementInfo) {
        self.record(EventKind::ResultOpened { statement_id: s.id });
    }

    fn result_closed(&self, s: &StatementInfo, rows_fetched: u64) {
        self.record(EventKind::ResultClosed {
            statement_id: s.id,
            rows_fetched,
        });
    }

    fn transaction(&self, context_id: Uuid, event: &TransactionEvent) {
        self.record(EventKind::Transaction {
            context_id,
            transaction: event.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> StatementInfo {
        let mut info = StatementInfo::new(7, Uuid::nil(), StatementKind::Plain);
        info.query = Some("SELECT 1".to_string());
        info
    }

    #[test]
    fn test_recording_monitor_keeps_order() {
        let monitor = RecordingMonitor::new();
        let s = info();
        monitor.statement_opened(&s);
        monitor.execute_begin(&s);
        monitor.execute_end(&s, 0, None);
        monitor.statement_closed(&s);
        let kinds = monitor.kinds();
        assert_eq!(kinds.len(), 4);
        assert!(matches!(kinds[0], EventKind::StatementOpened { statement_id: 7, .. }));
        assert!(matches!(kinds[3], EventKind::StatementClosed { statement_id: 7 }));
        assert_eq!(
            monitor.count(|k| matches!(k, EventKind::ExecuteEnd { error: None, .. })),
            1
        );
    }

    #[test]
    fn test_execute_end_records_error_text() {
        let monitor = RecordingMonitor::new();
        let err = DriverError::general("boom");
        monitor.execute_end(&info(), -1, Some(&err));
        assert_eq!(
            monitor.kinds(),
            vec![EventKind::ExecuteEnd {
                statement_id: 7,
                update_count: -1,
                error: Some("boom".to_string()),
            }]
        );
    }

    #[test]
    fn test_events_serialize_with_tags() {
        let monitor = RecordingMonitor::new();
        monitor.transaction(
            Uuid::nil(),
            &TransactionEvent::Isolation {
                level: TransactionIsolation::Serializable,
            },
        );
        let json = serde_json::to_value(&monitor.events()[0]).unwrap();
        assert_eq!(json["event"], "transaction");
        assert_eq!(json["action"], "isolation");
        assert_eq!(json["level"], "serializable");
        assert!(json["at"].is_string());
    }

    #[test]
    fn test_noop_and_tracing_monitors_accept_events() {
        let s = info();
        for monitor in [&NoopMonitor as &dyn ExecutionMonitor, &TracingMonitor] {
            monitor.statement_opened(&s);
            monitor.execute_end(&s, 3, Some(&DriverError::general("x")));
            monitor.transaction(Uuid::nil(), &TransactionEvent::Commit);
        }
    }
}
