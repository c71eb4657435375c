//! Execution context: the managed wrapper around a raw connection.
//!
//! A context either borrows the source's shared connection for every call or,
//! when isolated, lazily opens a private physical connection on first use and
//! keeps it until [`ExecutionContext::close`]. All statements, fetchers and
//! transaction operations go through it.

use super::callable::CallableStatement;
use super::cancel::CancelSlot;
use super::cleanup::best_effort;
use super::fetcher::ResultFetcher;
use super::metadata::DatabaseMetadata;
use super::prepared::PreparedStatement;
use super::statement::ManagedStatement;
use super::transaction::{SavepointHandle, TransactionManager};
use crate::config::ExecutionConfig;
use crate::driver::{ConnectionSource, DriverCapabilities, RawConnection, RawCursor, RawStatement};
use crate::error::{DriverError, DriverResult, ExecError, ExecResult};
use crate::models::{PrepareSpec, StatementKind, StatementOptions, StatementType};
use crate::monitor::{
    BlockingObject, ExecutionMonitor, NoopTracker, ProgressTracker, TracingMonitor,
};
use crate::sync::lock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{Span, debug, info, info_span, warn};
use uuid::Uuid;

/// State shared by a context and everything it created.
pub(crate) struct ContextInner {
    pub(crate) id: Uuid,
    source: Arc<dyn ConnectionSource>,
    pub(crate) tracker: Arc<dyn ProgressTracker>,
    monitor: Arc<dyn ExecutionMonitor>,
    pub(crate) config: ExecutionConfig,
    title: Option<String>,
    isolated: bool,
    isolated_conn: Mutex<Option<Arc<dyn RawConnection>>>,
    pub(crate) cancel: CancelSlot,
    block_active: AtomicBool,
    closed: AtomicBool,
    next_statement_id: AtomicU64,
    pub(crate) span: Span,
}

impl ContextInner {
    /// The monitoring sink, unless monitoring is switched off.
    pub(crate) fn monitor(&self) -> Option<&dyn ExecutionMonitor> {
        self.config.monitor_enabled.then_some(self.monitor.as_ref())
    }

    pub(crate) fn capabilities(&self) -> DriverCapabilities {
        self.source.capabilities()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_open(&self) -> ExecResult<()> {
        if self.is_closed() {
            return Err(ExecError::closed("Execution context"));
        }
        Ok(())
    }

    pub(crate) fn next_statement_id(&self) -> u64 {
        self.next_statement_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// The isolated connection (opened on first use) or a borrowed one.
    pub(crate) fn resolve_connection(&self) -> ExecResult<Arc<dyn RawConnection>> {
        self.ensure_open()?;
        if !self.isolated {
            return self.source.get_connection().map_err(|e| {
                ExecError::connection_failed(e, "Check that the data source is reachable")
            });
        }

        let mut slot = lock(&self.isolated_conn);
        if let Some(conn) = slot.as_ref() {
            return Ok(Arc::clone(conn));
        }
        let conn = self.source.open_isolated_connection().map_err(|e| {
            ExecError::connection_failed(
                e,
                "Check that the data source accepts additional connections",
            )
        })?;
        info!(parent: &self.span, source = %self.source.name(), "Opened isolated connection");
        *slot = Some(Arc::clone(&conn));
        Ok(conn)
    }

    fn is_connected(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        if self.isolated {
            return lock(&self.isolated_conn)
                .as_ref()
                .is_some_and(|conn| !conn.is_closed());
        }
        self.source
            .get_connection()
            .is_ok_and(|conn| !conn.is_closed())
    }

    fn cancel_running(&self) -> ExecResult<()> {
        match self.cancel.cancel() {
            Ok(true) => {
                info!(parent: &self.span, "Cancelled blocking call by closing its connection");
                Ok(())
            }
            Ok(false) => {
                debug!(parent: &self.span, "No blocking call to cancel");
                Ok(())
            }
            Err(e) => Err(ExecError::Driver(e)),
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.block_active.swap(false, Ordering::SeqCst) {
            self.tracker.end_block();
        }
        if let Some(conn) = lock(&self.isolated_conn).take() {
            best_effort("close isolated connection", conn.close());
            info!(parent: &self.span, "Closed isolated connection");
        }
        debug!(parent: &self.span, "Execution context closed");
    }
}

impl BlockingObject for ContextInner {
    fn cancel_block(&self) -> ExecResult<()> {
        self.cancel_running()
    }
}

/// Owner handle used when registering progress blocks.
pub(crate) fn blocking_owner(inner: &Arc<ContextInner>) -> Arc<dyn BlockingObject> {
    Arc::clone(inner) as Arc<dyn BlockingObject>
}

/// Builder for [`ExecutionContext`].
pub struct ContextBuilder {
    source: Arc<dyn ConnectionSource>,
    tracker: Arc<dyn ProgressTracker>,
    monitor: Arc<dyn ExecutionMonitor>,
    config: ExecutionConfig,
    title: Option<String>,
    isolated: bool,
}

impl ContextBuilder {
    /// Work on a private physical connection instead of the shared one.
    pub fn isolated(mut self, isolated: bool) -> Self {
        self.isolated = isolated;
        self
    }

    /// Task title; registers a progress block for the context's lifetime.
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn tracker(mut self, tracker: Arc<dyn ProgressTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn monitor(mut self, monitor: Arc<dyn ExecutionMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> ExecResult<ExecutionContext> {
        self.config.validate().map_err(ExecError::invalid_input)?;

        let id = Uuid::new_v4();
        let span = info_span!(
            "exec_context",
            context_id = %id,
            title = self.title.as_deref().unwrap_or(""),
            isolated = self.isolated
        );
        let inner = Arc::new(ContextInner {
            id,
            source: self.source,
            tracker: self.tracker,
            monitor: self.monitor,
            config: self.config,
            title: self.title,
            isolated: self.isolated,
            isolated_conn: Mutex::new(None),
            cancel: CancelSlot::new(),
            block_active: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            next_statement_id: AtomicU64::new(0),
            span,
        });

        if let Some(title) = &inner.title {
            let label = inner.config.truncate_label(title);
            inner.tracker.start_block(blocking_owner(&inner), Some(&label));
            inner.block_active.store(true, Ordering::SeqCst);
        }

        info!(
            parent: &inner.span,
            source = %inner.source.name(),
            "Execution context opened"
        );
        Ok(ExecutionContext { inner })
    }
}

/// A statement produced by [`ExecutionContext::prepare_typed`].
pub enum TypedStatement {
    /// Plain statement carrying the query text it was created for.
    Plain(ManagedStatement),
    Prepared(PreparedStatement),
    Callable(CallableStatement),
}

impl TypedStatement {
    pub fn kind(&self) -> StatementKind {
        self.base().kind()
    }

    pub fn base(&self) -> &ManagedStatement {
        match self {
            Self::Plain(s) => s,
            Self::Prepared(s) => s,
            Self::Callable(s) => s,
        }
    }

    pub fn base_mut(&mut self) -> &mut ManagedStatement {
        match self {
            Self::Plain(s) => s,
            Self::Prepared(s) => s,
            Self::Callable(s) => s,
        }
    }

    fn recorded_query(stmt: &ManagedStatement) -> ExecResult<String> {
        stmt.query()
            .map(str::to_string)
            .ok_or_else(|| ExecError::invalid_input("Statement has no query text"))
    }

    /// Execute the statement's query text.
    pub fn execute(&mut self) -> ExecResult<bool> {
        match self {
            Self::Plain(s) => {
                let sql = Self::recorded_query(s)?;
                s.execute(&sql)
            }
            Self::Prepared(s) => s.execute(),
            Self::Callable(s) => s.execute(),
        }
    }

    pub fn execute_query(&mut self) -> ExecResult<ResultFetcher> {
        match self {
            Self::Plain(s) => {
                let sql = Self::recorded_query(s)?;
                s.execute_query(&sql)
            }
            Self::Prepared(s) => s.execute_query(),
            Self::Callable(s) => s.execute_query(),
        }
    }

    pub fn execute_update(&mut self) -> ExecResult<i64> {
        match self {
            Self::Plain(s) => {
                let sql = Self::recorded_query(s)?;
                s.execute_update(&sql)
            }
            Self::Prepared(s) => s.execute_update(),
            Self::Callable(s) => s.execute_update(),
        }
    }

    pub fn close(&mut self) {
        self.base_mut().close();
    }
}

/// Managed connection handle.
///
/// Safe to share between threads so a second thread can call
/// [`cancel_block`](Self::cancel_block) while the first is blocked in a
/// statement. Running statements concurrently on one context is a caller
/// error.
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

impl ExecutionContext {
    pub fn builder(source: Arc<dyn ConnectionSource>) -> ContextBuilder {
        ContextBuilder {
            source,
            tracker: Arc::new(NoopTracker),
            monitor: Arc::new(TracingMonitor),
            config: ExecutionConfig::default(),
            title: None,
            isolated: false,
        }
    }

    /// Shortcut for a non-isolated, untitled context with default settings.
    pub fn open(source: Arc<dyn ConnectionSource>) -> ExecResult<Self> {
        Self::builder(source).build()
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn title(&self) -> Option<&str> {
        self.inner.title.as_deref()
    }

    pub fn is_isolated(&self) -> bool {
        self.inner.isolated
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.inner.config
    }

    pub fn source_name(&self) -> &str {
        self.inner.source.name()
    }

    pub fn capabilities(&self) -> DriverCapabilities {
        self.inner.capabilities()
    }

    pub(crate) fn inner(&self) -> &Arc<ContextInner> {
        &self.inner
    }

    pub(crate) fn resolve_connection(&self) -> ExecResult<Arc<dyn RawConnection>> {
        self.inner.resolve_connection()
    }

    /// Try `spec`, then progressively simpler requests while the driver
    /// reports the richer one as unsupported.
    fn with_fallback<F>(&self, spec: &PrepareSpec, mut prepare: F) -> ExecResult<Box<dyn RawStatement>>
    where
        F: FnMut(&PrepareSpec) -> DriverResult<Box<dyn RawStatement>>,
    {
        let mut candidates = vec![spec.clone()];
        if spec.generated_keys.is_requested() {
            candidates.push(spec.without_keys());
        }
        if !spec.is_plain() {
            candidates.push(PrepareSpec::plain());
        }
        candidates.dedup();

        let mut last_error: Option<DriverError> = None;
        for candidate in &candidates {
            match prepare(candidate) {
                Ok(raw) => return Ok(raw),
                Err(e) if e.is_feature_unsupported() => {
                    debug!(
                        parent: &self.inner.span,
                        error = %e,
                        "Driver rejected statement options, retrying with a simpler request"
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(last_error.map_or_else(|| ExecError::unsupported("statement creation"), ExecError::from))
    }

    fn wrap(
        &self,
        conn: Arc<dyn RawConnection>,
        raw: Box<dyn RawStatement>,
        kind: StatementKind,
        query: Option<String>,
        options: &StatementOptions,
    ) -> ManagedStatement {
        ManagedStatement::open(
            Arc::clone(&self.inner),
            Some(conn),
            raw,
            kind,
            query,
            !options.disable_monitoring,
        )
    }

    /// Create a plain statement.
    pub fn create_statement(&self, options: &StatementOptions) -> ExecResult<ManagedStatement> {
        let conn = self.resolve_connection()?;
        let raw = self.with_fallback(&options.to_spec(), |spec| conn.create_statement(spec))?;
        Ok(self.wrap(conn, raw, StatementKind::Plain, None, options))
    }

    /// Prepare `sql` for repeated execution with bound parameters.
    pub fn prepare_statement(
        &self,
        sql: &str,
        options: &StatementOptions,
    ) -> ExecResult<PreparedStatement> {
        let conn = self.resolve_connection()?;
        let raw = self.with_fallback(&options.to_spec(), |spec| conn.prepare_statement(sql, spec))?;
        Ok(PreparedStatement::new(self.wrap(
            conn,
            raw,
            StatementKind::Prepared,
            Some(sql.to_string()),
            options,
        )))
    }

    /// Prepare a stored procedure call.
    pub fn prepare_call(&self, sql: &str, options: &StatementOptions) -> ExecResult<CallableStatement> {
        let conn = self.resolve_connection()?;
        let raw = self.with_fallback(&options.to_spec(), |spec| conn.prepare_call(sql, spec))?;
        Ok(CallableStatement::new(PreparedStatement::new(self.wrap(
            conn,
            raw,
            StatementKind::Callable,
            Some(sql.to_string()),
            options,
        ))))
    }

    /// Create the statement kind matching `statement_type`, falling back to a
    /// simpler kind when the driver does not support the requested one.
    pub fn prepare_typed(
        &self,
        statement_type: StatementType,
        sql: &str,
        options: &StatementOptions,
    ) -> ExecResult<TypedStatement> {
        let unsupported = |e: &ExecError| e.driver_error().is_some_and(DriverError::is_feature_unsupported);
        match statement_type {
            StatementType::Exec => match self.prepare_call(sql, options) {
                Ok(call) => Ok(TypedStatement::Callable(call)),
                Err(e) if unsupported(&e) => {
                    debug!(parent: &self.inner.span, error = %e, "Calls not supported, preparing a statement instead");
                    self.prepare_statement(sql, options).map(TypedStatement::Prepared)
                }
                Err(e) => Err(e),
            },
            StatementType::Query => match self.prepare_statement(sql, options) {
                Ok(prepared) => Ok(TypedStatement::Prepared(prepared)),
                Err(e) if unsupported(&e) => {
                    debug!(parent: &self.inner.span, error = %e, "Prepare not supported, using a plain statement");
                    self.script_statement(sql, options)
                }
                Err(e) => Err(e),
            },
            StatementType::Script => self.script_statement(sql, options),
        }
    }

    fn script_statement(&self, sql: &str, options: &StatementOptions) -> ExecResult<TypedStatement> {
        let mut stmt = self.create_statement(options)?;
        stmt.set_query(sql);
        Ok(TypedStatement::Plain(stmt))
    }

    /// Hand a cursor that did not come from a query (metadata lookups, driver
    /// extensions) to the managed layer. The fetcher owns a synthetic
    /// statement labelled with `description`.
    pub fn wrap_cursor(&self, raw: Box<dyn RawCursor>, description: &str) -> ResultFetcher {
        ResultFetcher::synthetic(Arc::clone(&self.inner), raw, description)
    }

    pub fn transaction_manager(&self) -> TransactionManager<'_> {
        TransactionManager::new(self)
    }

    pub fn commit(&self) -> ExecResult<()> {
        self.transaction_manager().commit()
    }

    /// Roll back the whole transaction, or to `savepoint` when given.
    pub fn rollback(&self, savepoint: Option<&SavepointHandle>) -> ExecResult<()> {
        self.transaction_manager().rollback(savepoint)
    }

    pub fn auto_commit(&self) -> ExecResult<bool> {
        self.transaction_manager().auto_commit()
    }

    pub fn set_auto_commit(&self, enabled: bool) -> ExecResult<()> {
        self.transaction_manager().set_auto_commit(enabled)
    }

    pub fn metadata(&self) -> ExecResult<DatabaseMetadata> {
        let conn = self.resolve_connection()?;
        let raw = conn.metadata()?;
        Ok(DatabaseMetadata::new(Arc::clone(&self.inner), raw))
    }

    /// Whether the context is open and its connection usable. An isolated
    /// context that has not opened its connection yet is not connected.
    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn is_read_only(&self) -> ExecResult<bool> {
        Ok(self.resolve_connection()?.is_read_only()?)
    }

    pub fn set_read_only(&self, read_only: bool) -> ExecResult<()> {
        Ok(self.resolve_connection()?.set_read_only(read_only)?)
    }

    pub fn catalog(&self) -> ExecResult<Option<String>> {
        Ok(self.resolve_connection()?.catalog()?)
    }

    pub fn set_catalog(&self, catalog: &str) -> ExecResult<()> {
        Ok(self.resolve_connection()?.set_catalog(catalog)?)
    }

    /// Driver's native form of `sql`.
    pub fn native_sql(&self, sql: &str) -> ExecResult<String> {
        Ok(self.resolve_connection()?.native_sql(sql)?)
    }

    /// Interrupt the statement currently blocked on this context by
    /// force-closing its connection. Callable from any thread; the blocked
    /// call then fails with [`ExecError::Cancelled`].
    pub fn cancel_block(&self) -> ExecResult<()> {
        self.inner.cancel_running()
    }

    /// Handle for cancelling from another thread without borrowing the context.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Release the context's progress block and close the isolated connection,
    /// if one was opened. Borrowed connections are left open. Never fails.
    pub fn close(&self) {
        self.inner.close();
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        if !self.inner.is_closed() {
            warn!(parent: &self.inner.span, "Execution context dropped without close");
            self.inner.close();
        }
    }
}

/// Cloneable cancellation handle for an [`ExecutionContext`].
#[derive(Clone)]
pub struct CancelHandle {
    inner: Arc<ContextInner>,
}

impl CancelHandle {
    pub fn cancel_block(&self) -> ExecResult<()> {
        self.inner.cancel_running()
    }

    pub fn context_id(&self) -> Uuid {
        self.inner.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{MemoryDatabase, MemorySource, MemoryTable};
    use crate::models::Value;
    use crate::monitor::BlockStack;

    fn source() -> Arc<MemorySource> {
        let db = Arc::new(MemoryDatabase::new("ctx"));
        db.register_query(
            "SELECT 1",
            MemoryTable::new(&["one"]).with_rows(vec![vec![Value::Int(1)]]),
        );
        Arc::new(MemorySource::new(db))
    }

    #[test]
    fn test_non_isolated_context_never_opens_connections() {
        let source = source();
        let ctx = ExecutionContext::open(source.clone()).unwrap();
        let mut stmt = ctx.create_statement(&StatementOptions::new()).unwrap();
        stmt.execute("SELECT 1").unwrap();
        stmt.close();
        ctx.close();
        assert!(source.isolated_connections().is_empty());
        assert!(!source.shared_connection().is_closed());
    }

    #[test]
    fn test_isolated_connection_opened_once_and_closed() {
        let source = source();
        let ctx = ExecutionContext::builder(source.clone())
            .isolated(true)
            .build()
            .unwrap();
        assert!(source.isolated_connections().is_empty());
        ctx.create_statement(&StatementOptions::new()).unwrap();
        ctx.create_statement(&StatementOptions::new()).unwrap();
        assert_eq!(source.isolated_connections().len(), 1);
        ctx.close();
        ctx.close();
        let conns = source.isolated_connections();
        assert!(conns[0].is_closed());
        assert_eq!(conns[0].close_calls(), 1);
    }

    #[test]
    fn test_title_registers_single_block() {
        let stack = Arc::new(BlockStack::new());
        let ctx = ExecutionContext::builder(source())
            .title("Export data")
            .tracker(stack.clone())
            .build()
            .unwrap();
        assert_eq!(stack.depth(), 1);
        assert_eq!(stack.current_label().as_deref(), Some("Export data"));
        ctx.close();
        ctx.close();
        assert_eq!(stack.started(), 1);
        assert_eq!(stack.ended(), 1);
    }

    #[test]
    fn test_drop_closes_context() {
        let stack = Arc::new(BlockStack::new());
        let source = source();
        {
            let ctx = ExecutionContext::builder(source.clone())
                .title("Scoped")
                .isolated(true)
                .tracker(stack.clone())
                .build()
                .unwrap();
            assert!(!ctx.is_connected());
            assert!(source.isolated_connections().is_empty());
            ctx.create_statement(&StatementOptions::new()).unwrap();
            assert!(ctx.is_connected());
        }
        assert_eq!(stack.ended(), 1);
        assert!(source.isolated_connections()[0].is_closed());
    }

    #[test]
    fn test_connection_refused_maps_to_connection_error() {
        let source = source();
        source.refuse_connections(true);
        let ctx = ExecutionContext::open(source.clone()).unwrap();
        let err = ctx.create_statement(&StatementOptions::new()).err().unwrap();
        assert!(matches!(err, ExecError::Connection { .. }));
        assert!(err.suggestion().is_some());
        assert!(!ctx.is_connected());
    }

    #[test]
    fn test_closed_context_rejects_work() {
        let ctx = ExecutionContext::open(source()).unwrap();
        ctx.close();
        assert!(ctx.is_closed());
        let err = ctx.create_statement(&StatementOptions::new()).err().unwrap();
        assert!(matches!(err, ExecError::Closed { .. }));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ExecutionConfig {
            fetch_size: Some(0),
            ..Default::default()
        };
        let err = ExecutionContext::builder(source()).config(config).build().err().unwrap();
        assert!(matches!(err, ExecError::InvalidInput { .. }));
    }

    #[test]
    fn test_connection_state_pass_through() {
        let ctx = ExecutionContext::open(source()).unwrap();
        assert!(!ctx.is_read_only().unwrap());
        ctx.set_read_only(true).unwrap();
        assert!(ctx.is_read_only().unwrap());
        ctx.set_catalog("sales").unwrap();
        assert_eq!(ctx.catalog().unwrap().as_deref(), Some("sales"));
        assert_eq!(ctx.native_sql("SELECT 1").unwrap(), "SELECT 1");
    }

    #[test]
    fn test_cancel_block_when_idle_is_noop() {
        let source = source();
        let ctx = ExecutionContext::open(source.clone()).unwrap();
        ctx.cancel_block().unwrap();
        ctx.cancel_handle().cancel_block().unwrap();
        assert!(!source.shared_connection().is_closed());
    }
}
