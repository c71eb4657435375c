//! Managed statement: execution lifecycle around a raw statement.
//!
//! Every execution records the query text, opens a progress block, reports
//! begin/end to the monitor and captures the update count or the driver
//! error. On failure the owning transaction can optionally be rolled back.

use super::cleanup::best_effort;
use super::context::{ContextInner, blocking_owner};
use super::fetcher::ResultFetcher;
use crate::driver::{DetachedStatement, DriverWarning, RawConnection, RawCursor, RawStatement};
use crate::error::{DriverError, DriverResult, ExecError, ExecResult};
use crate::models::{GeneratedKeys, StatementInfo, StatementKind};
use crate::monitor::{ExecutionMonitor, TransactionEvent};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::{Span, debug, debug_span, info, warn};
use uuid::Uuid;

pub struct ManagedStatement {
    ctx: Arc<ContextInner>,
    /// Connection the statement was created on; `None` for synthetic statements.
    conn: Option<Arc<dyn RawConnection>>,
    raw: Box<dyn RawStatement>,
    info: StatementInfo,
    update_count: i64,
    last_error: Option<DriverError>,
    offset: u64,
    /// 0 = unbounded
    max_rows: u64,
    user_data: Option<Box<dyn Any + Send>>,
    data_container: Option<String>,
    block_active: bool,
    closed: bool,
    monitored: bool,
    span: Span,
}

impl ManagedStatement {
    pub(crate) fn open(
        ctx: Arc<ContextInner>,
        conn: Option<Arc<dyn RawConnection>>,
        mut raw: Box<dyn RawStatement>,
        kind: StatementKind,
        query: Option<String>,
        monitored: bool,
    ) -> Self {
        let mut info = StatementInfo::new(ctx.next_statement_id(), ctx.id, kind);
        info.query = query;
        let span = debug_span!(parent: &ctx.span, "statement", statement_id = info.id, kind = %kind);

        if let Some(secs) = ctx.config.query_timeout_secs {
            best_effort("set query timeout", raw.set_query_timeout(secs));
        }
        if let Some(rows) = ctx.config.fetch_size {
            best_effort("set fetch size", raw.set_fetch_size(rows));
        }

        let stmt = Self {
            ctx,
            conn,
            raw,
            info,
            update_count: -1,
            last_error: None,
            offset: 0,
            max_rows: 0,
            user_data: None,
            data_container: None,
            block_active: false,
            closed: false,
            monitored,
            span,
        };
        if let Some(monitor) = stmt.monitor() {
            monitor.statement_opened(&stmt.info);
        }
        stmt
    }

    /// Statement fabricated to own a cursor that no query produced. Its
    /// query text is the description as an SQL comment, and it reports one
    /// empty execution so monitors see a complete lifecycle.
    pub(crate) fn synthetic(ctx: Arc<ContextInner>, description: &str) -> Self {
        let mut stmt = Self::open(
            ctx,
            None,
            Box::new(DetachedStatement::new()),
            StatementKind::Synthetic,
            Some(format!("-- {description}")),
            true,
        );
        stmt.info.description = Some(description.to_string());
        stmt.begin_execute(None);
        stmt.update_count = 0;
        stmt.end_execute();
        stmt
    }

    fn monitor(&self) -> Option<&dyn ExecutionMonitor> {
        if self.monitored { self.ctx.monitor() } else { None }
    }

    pub(crate) fn context(&self) -> &Arc<ContextInner> {
        &self.ctx
    }

    pub(crate) fn raw(&self) -> &dyn RawStatement {
        self.raw.as_ref()
    }

    /// Raw statement for pass-through calls; fails once closed.
    pub(crate) fn raw_mut(&mut self) -> ExecResult<&mut dyn RawStatement> {
        self.ensure_open()?;
        Ok(self.raw.as_mut())
    }

    fn ensure_open(&self) -> ExecResult<()> {
        if self.closed {
            return Err(ExecError::closed("Statement"));
        }
        self.ctx.ensure_open()
    }

    // --- identity and state ---

    pub fn id(&self) -> u64 {
        self.info.id
    }

    pub fn context_id(&self) -> Uuid {
        self.info.context_id
    }

    pub fn kind(&self) -> StatementKind {
        self.info.kind
    }

    pub fn info(&self) -> &StatementInfo {
        &self.info
    }

    pub fn query(&self) -> Option<&str> {
        self.info.query.as_deref()
    }

    pub(crate) fn set_query(&mut self, sql: &str) {
        self.info.query = Some(sql.to_string());
    }

    pub fn description(&self) -> Option<&str> {
        self.info.description.as_deref()
    }

    /// Human-readable label shown instead of the query text.
    pub fn set_description(&mut self, description: impl Into<String>) {
        self.info.description = Some(description.into());
    }

    pub fn purpose(&self) -> Option<&str> {
        self.info.purpose.as_deref()
    }

    pub fn set_purpose(&mut self, purpose: impl Into<String>) {
        self.info.purpose = Some(purpose.into());
    }

    /// Update count of the last execution; -1 before the first execution or
    /// after a failure, 0 for result-producing statements.
    pub fn update_count(&self) -> i64 {
        self.update_count
    }

    /// Driver error captured by the last execution.
    pub fn last_error(&self) -> Option<&DriverError> {
        self.last_error.as_ref()
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Row cap applied to result fetchers; 0 = unbounded.
    pub fn max_rows(&self) -> u64 {
        self.max_rows
    }

    pub fn set_user_data<T: Any + Send>(&mut self, data: T) {
        self.user_data = Some(Box::new(data));
    }

    pub fn user_data<T: Any + Send>(&self) -> Option<&T> {
        self.user_data.as_ref()?.downcast_ref::<T>()
    }

    pub fn take_user_data(&mut self) -> Option<Box<dyn Any + Send>> {
        self.user_data.take()
    }

    /// Tag naming the data container (table, view) the statement reads.
    pub fn data_container(&self) -> Option<&str> {
        self.data_container.as_deref()
    }

    pub fn set_data_container(&mut self, container: impl Into<String>) {
        self.data_container = Some(container.into());
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    // --- lifecycle ---

    /// At most one block per statement. A block is still open here only when
    /// a previous driver call unwound out of `run`.
    fn start_block(&mut self, label: Option<String>) {
        if self.block_active {
            warn!(parent: &self.span, "Ending progress block left open by an interrupted execution");
            self.ctx.tracker.end_block();
        }
        let label = label
            .or_else(|| self.info.label().map(str::to_string))
            .map(|l| self.ctx.config.truncate_label(&l));
        self.ctx
            .tracker
            .start_block(blocking_owner(&self.ctx), label.as_deref());
        self.block_active = true;
    }

    fn end_block(&mut self) {
        if self.block_active {
            self.block_active = false;
            self.ctx.tracker.end_block();
        }
    }

    fn begin_execute(&mut self, label: Option<String>) {
        self.update_count = -1;
        self.last_error = None;
        self.start_block(label);
        if let Some(monitor) = self.monitor() {
            monitor.execute_begin(&self.info);
        }
    }

    fn end_execute(&mut self) {
        self.end_block();
        if let Some(monitor) = self.monitor() {
            monitor.execute_end(&self.info, self.update_count, self.last_error.as_ref());
        }
    }

    /// Run one driver execution inside the lifecycle. `count` derives the
    /// update count from a successful result.
    pub(crate) fn run<T>(
        &mut self,
        operation: &'static str,
        sql: Option<&str>,
        label: Option<String>,
        exec: impl FnOnce(&mut dyn RawStatement) -> DriverResult<T>,
        count: impl FnOnce(&T, &mut dyn RawStatement) -> i64,
    ) -> ExecResult<T> {
        self.ensure_open()?;
        if let Some(sql) = sql {
            self.info.query = Some(sql.to_string());
        }
        let span = self.span.clone();
        let _enter = span.enter();

        // Armed before the block is announced: a tracker may cancel the
        // owner as soon as `start_block` sees it.
        let armed = match &self.conn {
            Some(conn) => {
                self.ctx.cancel.arm(Arc::clone(conn));
                true
            }
            None => false,
        };
        self.begin_execute(label);
        let result = exec(self.raw.as_mut());
        let cancelled = armed && self.ctx.cancel.disarm();

        let result = match result {
            Ok(value) => {
                self.update_count = count(&value, self.raw.as_mut());
                debug!(update_count = self.update_count, "{operation} completed");
                Ok(value)
            }
            Err(err) => {
                self.last_error = Some(err.clone());
                if cancelled {
                    info!(error = %err, "{operation} cancelled");
                    Err(ExecError::cancelled(operation, err))
                } else {
                    debug!(error = %err, sql_state = err.sql_state.as_deref().unwrap_or(""), "{operation} failed");
                    self.rollback_after_error();
                    Err(ExecError::Driver(err))
                }
            }
        };
        self.end_execute();
        result
    }

    fn rollback_after_error(&self) {
        if !self.ctx.config.rollback_on_error {
            return;
        }
        let Some(conn) = &self.conn else {
            return;
        };
        if conn.is_closed() {
            return;
        }
        match conn.auto_commit() {
            Ok(false) => {
                if best_effort("roll back after failed statement", conn.rollback()).is_some() {
                    info!("Rolled back transaction after failed statement");
                    if let Some(monitor) = self.ctx.monitor() {
                        monitor.transaction(self.ctx.id, &TransactionEvent::Rollback { savepoint: None });
                    }
                }
            }
            Ok(true) => {}
            Err(e) => warn!(error = %e, "Failed to read auto-commit state"),
        }
    }

    // --- execution ---

    pub fn execute(&mut self, sql: &str) -> ExecResult<bool> {
        self.execute_with_keys(sql, &GeneratedKeys::None)
    }

    /// Execute and make the requested generated keys available through
    /// [`generated_keys`](Self::generated_keys).
    pub fn execute_with_keys(&mut self, sql: &str, keys: &GeneratedKeys) -> ExecResult<bool> {
        self.execute_raw(Some(sql), keys, None)
    }

    pub(crate) fn execute_raw(
        &mut self,
        sql: Option<&str>,
        keys: &GeneratedKeys,
        label: Option<String>,
    ) -> ExecResult<bool> {
        self.run(
            "execute",
            sql,
            label,
            |raw| raw.execute(sql, keys),
            |has_rows, raw| {
                if *has_rows {
                    0
                } else {
                    best_effort("read update count", raw.update_count()).unwrap_or(-1)
                }
            },
        )
    }

    pub fn execute_query(&mut self, sql: &str) -> ExecResult<ResultFetcher> {
        self.query_raw(Some(sql), None)
    }

    pub(crate) fn query_raw(&mut self, sql: Option<&str>, label: Option<String>) -> ExecResult<ResultFetcher> {
        let cursor = self.run("execute query", sql, label, |raw| raw.execute_query(sql), |_, _| 0)?;
        Ok(self.wrap_result(cursor, true))
    }

    pub fn execute_update(&mut self, sql: &str) -> ExecResult<i64> {
        self.update_raw(Some(sql), &GeneratedKeys::None, None)
    }

    pub fn execute_update_with_keys(&mut self, sql: &str, keys: &GeneratedKeys) -> ExecResult<i64> {
        self.update_raw(Some(sql), keys, None)
    }

    pub(crate) fn update_raw(
        &mut self,
        sql: Option<&str>,
        keys: &GeneratedKeys,
        label: Option<String>,
    ) -> ExecResult<i64> {
        self.run(
            "execute update",
            sql,
            label,
            |raw| raw.execute_update(sql, keys),
            |count, _| *count,
        )
    }

    pub fn add_batch(&mut self, sql: &str) -> ExecResult<()> {
        Ok(self.raw_mut()?.add_batch(Some(sql))?)
    }

    pub fn clear_batch(&mut self) -> ExecResult<()> {
        Ok(self.raw_mut()?.clear_batch()?)
    }

    /// Execute the queued batch. The captured update count is the sum of
    /// the known per-entry counts.
    pub fn execute_batch(&mut self) -> ExecResult<Vec<i64>> {
        self.execute_batch_labelled(None)
    }

    pub(crate) fn execute_batch_labelled(&mut self, label: Option<String>) -> ExecResult<Vec<i64>> {
        self.run(
            "execute batch",
            None,
            label,
            |raw| raw.execute_batch(),
            |counts, _| counts.iter().filter(|c| **c >= 0).sum(),
        )
    }

    // --- results ---

    pub(crate) fn wrap_result(
        &self,
        cursor: Box<dyn RawCursor>,
        apply_limit: bool,
    ) -> ResultFetcher {
        let (offset, max_rows) = if apply_limit {
            (self.offset, self.max_rows)
        } else {
            (0, 0)
        };
        ResultFetcher::for_statement(
            Arc::clone(&self.ctx),
            self.info.clone(),
            cursor,
            offset,
            max_rows,
            self.monitored,
        )
    }

    /// Current result of the last execution, if it produced rows.
    pub fn result_set(&mut self) -> ExecResult<Option<ResultFetcher>> {
        let cursor = self.raw_mut()?.result_set()?;
        Ok(cursor.map(|c| self.wrap_result(c, true)))
    }

    /// Like [`result_set`](Self::result_set) but fails if there is none.
    pub fn open_result_set(&mut self) -> ExecResult<ResultFetcher> {
        self.result_set()?
            .ok_or_else(|| ExecError::invalid_input("Statement has no result set"))
    }

    /// Keys generated by the last execution. Offset and limit do not apply.
    pub fn generated_keys(&mut self) -> ExecResult<Option<ResultFetcher>> {
        let cursor = self.raw_mut()?.generated_keys()?;
        Ok(cursor.map(|c| self.wrap_result(c, false)))
    }

    pub fn more_results(&mut self) -> ExecResult<bool> {
        Ok(self.raw_mut()?.more_results()?)
    }

    /// Driver's update count for the current result.
    pub fn update_row_count(&mut self) -> ExecResult<i64> {
        Ok(self.raw_mut()?.update_count()?)
    }

    /// Limit the rows produced by subsequent result sets.
    ///
    /// With `offset == 0` the driver is asked for at most `limit` rows. With
    /// an offset it is asked for `offset + limit` rows and the fetcher skips
    /// the first `offset` on first use. `limit == 0` means no cap. Drivers
    /// without native limits, or refusing them, are emulated.
    pub fn set_limit(&mut self, offset: u64, limit: u64) {
        self.offset = offset;
        self.max_rows = limit;
        let native = if limit == 0 {
            0
        } else {
            offset.saturating_add(limit)
        };
        if !self.ctx.capabilities().supports_result_set_limit {
            return;
        }
        if let Err(e) = self.raw.set_max_rows(native) {
            debug!(parent: &self.span, error = %e, "Can't set statement max rows");
        }
    }

    /// Statement warnings, skipping empty ones and stopping at the first
    /// repeat. Warnings are cleared after reading.
    pub fn warnings(&mut self) -> ExecResult<Vec<DriverWarning>> {
        let raw = self.raw_mut()?;
        let mut out: Vec<DriverWarning> = Vec::new();
        for warning in raw.warnings()? {
            if warning.is_empty() {
                continue;
            }
            if out.contains(&warning) {
                break;
            }
            out.push(warning);
        }
        best_effort("clear statement warnings", raw.clear_warnings());
        Ok(out)
    }

    /// Ask the driver to cancel the running execution.
    pub fn cancel(&mut self) -> ExecResult<()> {
        Ok(self.raw.cancel()?)
    }

    pub fn set_query_timeout(&mut self, secs: u32) -> ExecResult<()> {
        Ok(self.raw_mut()?.set_query_timeout(secs)?)
    }

    pub fn query_timeout(&self) -> ExecResult<u32> {
        Ok(self.raw.query_timeout()?)
    }

    pub fn set_fetch_size(&mut self, rows: u32) -> ExecResult<()> {
        Ok(self.raw_mut()?.set_fetch_size(rows)?)
    }

    pub fn fetch_size(&self) -> ExecResult<u32> {
        Ok(self.raw.fetch_size()?)
    }

    /// Close the statement. Repeated calls do nothing; raw close failures
    /// are logged.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.end_block();
        best_effort("close statement", self.raw.close());
        if let Some(monitor) = self.monitor() {
            monitor.statement_closed(&self.info);
        }
        debug!(parent: &self.span, "Statement closed");
    }
}

impl Drop for ManagedStatement {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ManagedStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedStatement")
            .field("info", &self.info)
            .field("update_count", &self.update_count)
            .field("offset", &self.offset)
            .field("max_rows", &self.max_rows)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
