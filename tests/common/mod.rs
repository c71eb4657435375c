//! Shared fixtures for integration tests.

#![allow(dead_code)]

use db_exec::db::{ExecutionContext, ResultFetcher};
use db_exec::driver::{DriverCapabilities, MemoryDatabase, MemorySource, MemoryTable};
use db_exec::models::Value;
use db_exec::monitor::{BlockStack, RecordingMonitor};
use std::sync::Arc;

pub const NUMBERS_QUERY: &str = "SELECT n FROM numbers";

/// Database with a `numbers` table holding 1..=rows.
pub fn numbers_database(rows: i64) -> Arc<MemoryDatabase> {
    let db = Arc::new(MemoryDatabase::new("it"));
    db.create_table(
        "numbers",
        MemoryTable::new(&["n"]).with_rows((1..=rows).map(|i| vec![Value::Int(i)]).collect()),
    );
    db.register_scan(NUMBERS_QUERY, "numbers");
    db
}

pub struct Harness {
    pub source: Arc<MemorySource>,
    pub monitor: Arc<RecordingMonitor>,
    pub stack: Arc<BlockStack>,
}

impl Harness {
    pub fn new(db: Arc<MemoryDatabase>) -> Self {
        Self::with_capabilities(db, DriverCapabilities::default())
    }

    pub fn with_capabilities(db: Arc<MemoryDatabase>, caps: DriverCapabilities) -> Self {
        Self {
            source: Arc::new(MemorySource::with_capabilities(db, caps)),
            monitor: Arc::new(RecordingMonitor::new()),
            stack: Arc::new(BlockStack::new()),
        }
    }

    pub fn context(&self, isolated: bool) -> ExecutionContext {
        ExecutionContext::builder(self.source.clone())
            .isolated(isolated)
            .monitor(self.monitor.clone())
            .tracker(self.stack.clone())
            .build()
            .unwrap()
    }
}

/// Read column 0 of every remaining row as an integer.
pub fn drain_ints(rs: &mut ResultFetcher) -> Vec<i64> {
    let mut out = Vec::new();
    while rs.advance().unwrap() {
        out.push(rs.get(0).unwrap().as_i64().unwrap());
    }
    out
}
