//! Result fetcher: managed wrapper around a raw cursor.
//!
//! Applies the owning statement's offset and row cap. The offset is skipped
//! on the first [`ResultFetcher::advance`], by absolute positioning when the
//! driver can scroll and by reading and discarding rows otherwise.

use super::cleanup::best_effort;
use super::context::ContextInner;
use super::statement::ManagedStatement;
use crate::driver::RawCursor;
use crate::error::{DriverError, ExecError, ExecResult};
use crate::models::{ColumnMeta, StatementInfo, Value};
use crate::monitor::ExecutionMonitor;
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Extension points around each row fetch.
pub trait FetchHook: Send {
    fn before_fetch(&mut self, _statement: &StatementInfo) {}

    /// `has_row` is false once the cursor is exhausted or the cap is reached.
    fn after_fetch(&mut self, _statement: &StatementInfo, _has_row: bool) {}
}

enum Owner {
    /// Snapshot of the statement that executed the query. The statement
    /// itself stays with the caller.
    Statement(StatementInfo),
    Synthetic(Box<ManagedStatement>),
}

impl Owner {
    fn info(&self) -> &StatementInfo {
        match self {
            Self::Statement(info) => info,
            Self::Synthetic(stmt) => stmt.info(),
        }
    }
}

pub struct ResultFetcher {
    ctx: Arc<ContextInner>,
    owner: Owner,
    raw: Box<dyn RawCursor>,
    offset: u64,
    /// 0 = unbounded
    max_rows: u64,
    rows_fetched: u64,
    started: bool,
    monitored: bool,
    hook: Option<Box<dyn FetchHook>>,
    closed: bool,
}

impl ResultFetcher {
    fn new(
        ctx: Arc<ContextInner>,
        owner: Owner,
        raw: Box<dyn RawCursor>,
        offset: u64,
        max_rows: u64,
        monitored: bool,
    ) -> Self {
        let fetcher = Self {
            ctx,
            owner,
            raw,
            offset,
            max_rows,
            rows_fetched: 0,
            started: false,
            monitored,
            hook: None,
            closed: false,
        };
        if let Some(monitor) = fetcher.monitor() {
            monitor.result_opened(fetcher.owner.info());
        }
        fetcher
    }

    pub(crate) fn for_statement(
        ctx: Arc<ContextInner>,
        info: StatementInfo,
        raw: Box<dyn RawCursor>,
        offset: u64,
        max_rows: u64,
        monitored: bool,
    ) -> Self {
        Self::new(ctx, Owner::Statement(info), raw, offset, max_rows, monitored)
    }

    /// Fetcher over a cursor no query produced; owns a synthetic statement
    /// labelled with `description`.
    pub(crate) fn synthetic(ctx: Arc<ContextInner>, raw: Box<dyn RawCursor>, description: &str) -> Self {
        let stmt = ManagedStatement::synthetic(Arc::clone(&ctx), description);
        Self::new(ctx, Owner::Synthetic(Box::new(stmt)), raw, 0, 0, true)
    }

    fn monitor(&self) -> Option<&dyn ExecutionMonitor> {
        if self.monitored { self.ctx.monitor() } else { None }
    }

    fn ensure_open(&self) -> ExecResult<()> {
        if self.closed {
            return Err(ExecError::closed("Result set"));
        }
        Ok(())
    }

    pub fn set_hook(&mut self, hook: Box<dyn FetchHook>) {
        self.hook = Some(hook);
    }

    /// Move to the next row. Returns false when the cursor is exhausted or the
    /// row cap is reached; a reached cap never touches the cursor.
    pub fn advance(&mut self) -> ExecResult<bool> {
        self.ensure_open()?;
        if self.max_rows > 0 && self.rows_fetched >= self.max_rows {
            return Ok(false);
        }
        if !self.started {
            self.started = true;
            if self.offset > 0 && !self.skip_offset()? {
                return Ok(false);
            }
        }

        let info = self.owner.info();
        if let Some(hook) = self.hook.as_mut() {
            hook.before_fetch(info);
        }
        let has_row = self.raw.next()?;
        if has_row {
            self.rows_fetched += 1;
        }
        if let Some(hook) = self.hook.as_mut() {
            hook.after_fetch(info, has_row);
        }
        Ok(has_row)
    }

    /// Position on the last skipped row. Returns false if the cursor ran out
    /// before the offset.
    fn skip_offset(&mut self) -> ExecResult<bool> {
        let offset = self.offset;
        if self.ctx.capabilities().supports_result_set_scroll {
            match self.raw.absolute(offset) {
                Ok(positioned) => return Ok(positioned),
                Err(e) if e.is_feature_unsupported() => {
                    debug!(error = %e, offset, "Cursor can't scroll, skipping rows instead");
                }
                Err(e) => {
                    let mut err = DriverError::general(format!("Can't scroll result set to row {offset}"));
                    err.sql_state = e.sql_state;
                    err.vendor_code = e.vendor_code;
                    return Err(err.into());
                }
            }
        }
        for _ in 0..offset {
            if !self.raw.next()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Value of the 0-based column `index` in the current row.
    pub fn get(&self, index: usize) -> ExecResult<Value> {
        self.ensure_open()?;
        Ok(self.raw.get(index)?)
    }

    pub fn get_by_name(&self, name: &str) -> ExecResult<Value> {
        self.ensure_open()?;
        Ok(self.raw.get_by_name(name)?)
    }

    pub fn columns(&self) -> ExecResult<Vec<ColumnMeta>> {
        self.ensure_open()?;
        Ok(self.raw.columns()?)
    }

    pub fn column_index(&self, name: &str) -> ExecResult<usize> {
        self.ensure_open()?;
        Ok(self.raw.column_index(name)?)
    }

    pub fn cursor_name(&self) -> ExecResult<Option<String>> {
        self.ensure_open()?;
        Ok(self.raw.cursor_name()?)
    }

    /// Rows returned by [`advance`](Self::advance) so far. Skipped offset rows
    /// are not counted.
    pub fn rows_fetched(&self) -> u64 {
        self.rows_fetched
    }

    pub fn max_rows(&self) -> u64 {
        self.max_rows
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self.owner, Owner::Synthetic(_))
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The statement this result belongs to.
    pub fn statement(&self) -> &StatementInfo {
        self.owner.info()
    }

    /// Read the remaining rows as JSON objects keyed by column name.
    pub fn fetch_all(&mut self) -> ExecResult<Vec<Map<String, JsonValue>>> {
        let columns = self.columns()?;
        let mut rows = Vec::new();
        while self.advance()? {
            let mut row = Map::with_capacity(columns.len());
            for (index, column) in columns.iter().enumerate() {
                let value = serde_json::to_value(self.get(index)?).map_err(|e| {
                    ExecError::internal(format!("Cannot convert column {} to JSON: {e}", column.name))
                })?;
                row.insert(column.name.clone(), value);
            }
            rows.push(row);
        }
        Ok(rows)
    }

    /// Close the cursor, and the owning statement when it is synthetic.
    /// Repeated calls do nothing.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(monitor) = self.monitor() {
            monitor.result_closed(self.owner.info(), self.rows_fetched);
        }
        best_effort("close result set", self.raw.close());
        if let Owner::Synthetic(stmt) = &mut self.owner {
            stmt.close();
        }
    }
}

impl Drop for ResultFetcher {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ResultFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultFetcher")
            .field("statement", self.owner.info())
            .field("offset", &self.offset)
            .field("max_rows", &self.max_rows)
            .field("rows_fetched", &self.rows_fetched)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ExecutionContext;
    use crate::driver::{DriverCapabilities, MemoryDatabase, MemorySource, MemoryTable, RowsCursor};
    use crate::models::StatementOptions;
    use crate::monitor::{EventKind, RecordingMonitor};
    use std::sync::Mutex;

    fn numbers(n: i64) -> MemoryTable {
        MemoryTable::new(&["n"]).with_rows((1..=n).map(|i| vec![Value::Int(i)]).collect())
    }

    fn context(caps: DriverCapabilities) -> (ExecutionContext, Arc<RecordingMonitor>) {
        let db = Arc::new(MemoryDatabase::new("fetch"));
        db.register_query("SELECT n FROM numbers", numbers(10));
        let monitor = Arc::new(RecordingMonitor::new());
        let ctx = ExecutionContext::builder(Arc::new(MemorySource::with_capabilities(db, caps)))
            .monitor(monitor.clone())
            .build()
            .unwrap();
        (ctx, monitor)
    }

    fn collect(fetcher: &mut ResultFetcher) -> Vec<i64> {
        let mut out = Vec::new();
        while fetcher.advance().unwrap() {
            out.push(fetcher.get(0).unwrap().as_i64().unwrap());
        }
        out
    }

    #[test]
    fn test_offset_and_limit_with_native_support() {
        let (ctx, _) = context(DriverCapabilities::default());
        let mut stmt = ctx.create_statement(&StatementOptions::new()).unwrap();
        stmt.set_limit(2, 3);
        let mut rs = stmt.execute_query("SELECT n FROM numbers").unwrap();
        assert_eq!(collect(&mut rs), vec![3, 4, 5]);
        assert_eq!(rs.rows_fetched(), 3);
    }

    #[test]
    fn test_offset_and_limit_emulated() {
        let (ctx, _) = context(DriverCapabilities {
            supports_result_set_limit: false,
            supports_result_set_scroll: false,
            ..Default::default()
        });
        let mut stmt = ctx.create_statement(&StatementOptions::new()).unwrap();
        stmt.set_limit(2, 3);
        let mut rs = stmt.execute_query("SELECT n FROM numbers").unwrap();
        assert_eq!(collect(&mut rs), vec![3, 4, 5]);
        // The cap stops further reads even though the cursor has rows left.
        assert!(!rs.advance().unwrap());
        assert_eq!(rs.rows_fetched(), 3);
    }

    #[test]
    fn test_offset_with_scrollable_cursor() {
        let (ctx, _) = context(DriverCapabilities::default());
        let mut stmt = ctx
            .create_statement(&StatementOptions::new().scrollable())
            .unwrap();
        stmt.set_limit(8, 0);
        let mut rs = stmt.execute_query("SELECT n FROM numbers").unwrap();
        assert_eq!(collect(&mut rs), vec![9, 10]);
    }

    #[test]
    fn test_offset_past_end_yields_nothing() {
        let (ctx, _) = context(DriverCapabilities::default());
        let mut stmt = ctx.create_statement(&StatementOptions::new()).unwrap();
        stmt.set_limit(20, 5);
        let mut rs = stmt.execute_query("SELECT n FROM numbers").unwrap();
        assert!(collect(&mut rs).is_empty());
        assert_eq!(rs.rows_fetched(), 0);
    }

    #[test]
    fn test_closing_real_fetcher_keeps_statement_open() {
        let (ctx, monitor) = context(DriverCapabilities::default());
        let mut stmt = ctx.create_statement(&StatementOptions::new()).unwrap();
        let mut rs = stmt.execute_query("SELECT n FROM numbers").unwrap();
        rs.advance().unwrap();
        rs.close();
        rs.close();
        assert!(!stmt.is_closed());
        assert_eq!(
            monitor.count(|k| matches!(k, EventKind::ResultClosed { rows_fetched: 1, .. })),
            1
        );
        assert_eq!(monitor.count(|k| matches!(k, EventKind::StatementClosed { .. })), 0);
    }

    #[test]
    fn test_synthetic_fetcher_closes_its_statement() {
        let (ctx, monitor) = context(DriverCapabilities::default());
        let cursor = RowsCursor::from_names(&["name"], vec![vec![Value::from("a")]]);
        let mut rs = ctx.wrap_cursor(Box::new(cursor), "Read table list");
        assert!(rs.is_synthetic());
        assert_eq!(rs.statement().query.as_deref(), Some("-- Read table list"));
        assert_eq!(rs.statement().description.as_deref(), Some("Read table list"));
        assert!(rs.advance().unwrap());
        assert_eq!(rs.get_by_name("name").unwrap(), Value::from("a"));
        rs.close();
        assert_eq!(monitor.count(|k| matches!(k, EventKind::StatementClosed { .. })), 1);
        assert_eq!(
            monitor.count(|k| matches!(k, EventKind::ExecuteEnd { update_count: 0, .. })),
            1
        );
    }

    #[test]
    fn test_closed_fetcher_rejects_access() {
        let (ctx, _) = context(DriverCapabilities::default());
        let mut stmt = ctx.create_statement(&StatementOptions::new()).unwrap();
        let mut rs = stmt.execute_query("SELECT n FROM numbers").unwrap();
        rs.close();
        assert!(matches!(rs.advance().unwrap_err(), ExecError::Closed { .. }));
        assert!(matches!(rs.get(0).unwrap_err(), ExecError::Closed { .. }));
        assert!(matches!(rs.columns().unwrap_err(), ExecError::Closed { .. }));
        assert!(matches!(rs.column_index("n").unwrap_err(), ExecError::Closed { .. }));
        assert!(matches!(rs.cursor_name().unwrap_err(), ExecError::Closed { .. }));
        assert!(matches!(rs.fetch_all().unwrap_err(), ExecError::Closed { .. }));
    }

    #[derive(Clone, Default)]
    struct CountingHook {
        calls: Arc<Mutex<Vec<(&'static str, bool)>>>,
    }

    impl FetchHook for CountingHook {
        fn before_fetch(&mut self, _statement: &StatementInfo) {
            self.calls.lock().unwrap().push(("before", false));
        }

        fn after_fetch(&mut self, _statement: &StatementInfo, has_row: bool) {
            self.calls.lock().unwrap().push(("after", has_row));
        }
    }

    #[test]
    fn test_hooks_wrap_each_fetch() {
        let (ctx, _) = context(DriverCapabilities::default());
        let mut stmt = ctx.create_statement(&StatementOptions::new()).unwrap();
        stmt.set_limit(0, 1);
        let mut rs = stmt.execute_query("SELECT n FROM numbers").unwrap();
        let hook = CountingHook::default();
        rs.set_hook(Box::new(hook.clone()));
        assert!(rs.advance().unwrap());
        // Capped: no hook calls, no cursor access.
        assert!(!rs.advance().unwrap());
        assert_eq!(
            *hook.calls.lock().unwrap(),
            vec![("before", false), ("after", true)]
        );
    }

    #[test]
    fn test_fetch_all_as_json() {
        let (ctx, _) = context(DriverCapabilities::default());
        let mut stmt = ctx.create_statement(&StatementOptions::new()).unwrap();
        stmt.set_limit(0, 2);
        let mut rs = stmt.execute_query("SELECT n FROM numbers").unwrap();
        let rows = rs.fetch_all().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["n"], serde_json::json!(2));
    }
}
