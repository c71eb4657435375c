use super::metadata::MemoryMetadata;
use super::statement::{MemoryStatement, StatementMode};
use super::{MemoryDatabase, Tables};
use crate::driver::{DriverCapabilities, RawConnection, RawMetadata, RawSavepoint, RawStatement};
use crate::error::{DriverError, DriverResult};
use crate::models::{PrepareSpec, TransactionIsolation};
use crate::sync::lock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// Blocking statements give up after this long even if nobody closes the connection.
const BLOCK_LIMIT: Duration = Duration::from_secs(30);

/// Connection to a [`MemoryDatabase`]. Clones share the same session.
#[derive(Clone)]
pub struct MemoryConnection {
    inner: Arc<ConnectionInner>,
}

pub(super) struct ConnectionInner {
    pub(super) db: Arc<MemoryDatabase>,
    pub(super) capabilities: DriverCapabilities,
    session: Mutex<Session>,
    closed: Mutex<bool>,
    closed_signal: Condvar,
    close_calls: AtomicUsize,
}

struct Session {
    auto_commit: bool,
    isolation: i32,
    read_only: bool,
    catalog: Option<String>,
    /// Uncommitted copy of the tables, created by the first write of a transaction.
    working: Option<Tables>,
    savepoints: Vec<Snapshot>,
    next_savepoint_id: i64,
}

struct Snapshot {
    id: i64,
    tables: Tables,
}

/// Savepoint taken on a memory connection.
#[derive(Debug, Clone)]
pub struct MemorySavepoint {
    id: i64,
    name: Option<String>,
}

impl RawSavepoint for MemorySavepoint {
    fn id(&self) -> DriverResult<i64> {
        Ok(self.id)
    }

    fn name(&self) -> DriverResult<String> {
        self.name
            .clone()
            .ok_or_else(|| DriverError::general("Savepoint is unnamed"))
    }
}

impl MemoryConnection {
    pub fn open(db: Arc<MemoryDatabase>, capabilities: DriverCapabilities) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                db,
                capabilities,
                session: Mutex::new(Session {
                    auto_commit: true,
                    isolation: TransactionIsolation::ReadCommitted.code(),
                    read_only: false,
                    catalog: None,
                    working: None,
                    savepoints: Vec::new(),
                    next_savepoint_id: 1,
                }),
                closed: Mutex::new(false),
                closed_signal: Condvar::new(),
                close_calls: AtomicUsize::new(0),
            }),
        }
    }

    /// Whether uncommitted changes exist.
    pub fn in_transaction(&self) -> bool {
        lock(&self.inner.session).working.is_some()
    }

    /// Number of `close()` calls received, including repeated ones.
    pub fn close_calls(&self) -> usize {
        self.inner.close_calls.load(Ordering::SeqCst)
    }

    pub fn savepoint_count(&self) -> usize {
        lock(&self.inner.session).savepoints.len()
    }

    /// Rows of `table` as this connection currently sees them.
    pub fn visible_rows(&self, table: &str) -> Option<usize> {
        self.inner.read_tables(|tables| tables.get(table).map(|t| t.len()))
    }

    fn statement(
        &self,
        sql: Option<&str>,
        mode: StatementMode,
        spec: &PrepareSpec,
    ) -> DriverResult<Box<dyn RawStatement>> {
        self.inner.ensure_open()?;
        if spec.generated_keys.is_requested() && !self.inner.capabilities.supports_generated_keys {
            return Err(DriverError::unsupported("generated keys"));
        }
        Ok(Box::new(MemoryStatement::new(
            Arc::clone(&self.inner),
            sql.map(str::to_string),
            mode,
            spec,
        )))
    }

    fn transaction_op(&self, operation: &str) -> DriverResult<std::sync::MutexGuard<'_, Session>> {
        self.inner.ensure_open()?;
        let session = lock(&self.inner.session);
        if session.auto_commit {
            return Err(DriverError::general(format!(
                "Cannot {operation} in auto-commit mode"
            ))
            .with_sql_state("25000"));
        }
        Ok(session)
    }
}

impl ConnectionInner {
    pub(super) fn is_closed(&self) -> bool {
        *lock(&self.closed)
    }

    pub(super) fn ensure_open(&self) -> DriverResult<()> {
        if self.is_closed() {
            return Err(DriverError::closed("Connection is closed"));
        }
        Ok(())
    }

    /// Park the calling thread until another thread closes this connection.
    pub(super) fn wait_until_closed(&self) -> DriverError {
        let deadline = Instant::now() + BLOCK_LIMIT;
        let mut closed = lock(&self.closed);
        while !*closed {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return DriverError::timeout("Statement did not complete in time");
            }
            closed = match self.closed_signal.wait_timeout(closed, remaining) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        DriverError::closed("Connection closed while statement was running")
    }

    pub(super) fn read_tables<R>(&self, f: impl FnOnce(&Tables) -> R) -> R {
        let session = lock(&self.session);
        match &session.working {
            Some(working) => f(working),
            None => f(&self.db.committed()),
        }
    }

    /// Apply `f` to this connection's view of the tables. Changes land only if
    /// `f` succeeds.
    pub(super) fn write_tables<R>(
        &self,
        f: impl FnOnce(&mut Tables) -> DriverResult<R>,
    ) -> DriverResult<R> {
        let mut session = lock(&self.session);
        if session.read_only {
            return Err(DriverError::general("Connection is read-only").with_sql_state("25006"));
        }
        if session.auto_commit {
            let mut committed = self.db.committed();
            let mut copy = committed.clone();
            let result = f(&mut copy)?;
            *committed = copy;
            return Ok(result);
        }
        let mut copy = match &session.working {
            Some(working) => working.clone(),
            None => self.db.committed().clone(),
        };
        let result = f(&mut copy)?;
        session.working = Some(copy);
        Ok(result)
    }
}

impl RawConnection for MemoryConnection {
    fn create_statement(&self, spec: &PrepareSpec) -> DriverResult<Box<dyn RawStatement>> {
        self.statement(None, StatementMode::Plain, spec)
    }

    fn prepare_statement(&self, sql: &str, spec: &PrepareSpec) -> DriverResult<Box<dyn RawStatement>> {
        self.statement(Some(sql), StatementMode::Prepared, spec)
    }

    fn prepare_call(&self, sql: &str, spec: &PrepareSpec) -> DriverResult<Box<dyn RawStatement>> {
        self.statement(Some(sql), StatementMode::Callable, spec)
    }

    fn auto_commit(&self) -> DriverResult<bool> {
        self.inner.ensure_open()?;
        Ok(lock(&self.inner.session).auto_commit)
    }

    fn set_auto_commit(&self, auto_commit: bool) -> DriverResult<()> {
        self.inner.ensure_open()?;
        let mut session = lock(&self.inner.session);
        if auto_commit && !session.auto_commit {
            // Switching auto-commit on commits the open transaction.
            if let Some(working) = session.working.take() {
                *self.inner.db.committed() = working;
            }
            session.savepoints.clear();
        }
        session.auto_commit = auto_commit;
        Ok(())
    }

    fn commit(&self) -> DriverResult<()> {
        let mut session = self.transaction_op("commit")?;
        if let Some(working) = session.working.take() {
            *self.inner.db.committed() = working;
        }
        session.savepoints.clear();
        debug!(db = %self.inner.db.name(), "Memory transaction committed");
        Ok(())
    }

    fn rollback(&self) -> DriverResult<()> {
        let mut session = self.transaction_op("rollback")?;
        if let Some(err) = self.inner.db.rollback_failure() {
            return Err(err);
        }
        session.working = None;
        session.savepoints.clear();
        debug!(db = %self.inner.db.name(), "Memory transaction rolled back");
        Ok(())
    }

    fn set_savepoint(&self, name: Option<&str>) -> DriverResult<Box<dyn RawSavepoint>> {
        if !self.inner.capabilities.supports_savepoints {
            return Err(DriverError::unsupported("savepoints"));
        }
        let mut session = self.transaction_op("set a savepoint")?;
        let tables = match &session.working {
            Some(working) => working.clone(),
            None => self.inner.db.committed().clone(),
        };
        let id = session.next_savepoint_id;
        session.next_savepoint_id += 1;
        session.savepoints.push(Snapshot { id, tables });
        Ok(Box::new(MemorySavepoint {
            id,
            name: name.map(str::to_string),
        }))
    }

    fn rollback_to_savepoint(&self, savepoint: &dyn RawSavepoint) -> DriverResult<()> {
        let id = savepoint.id()?;
        let mut session = self.transaction_op("roll back to a savepoint")?;
        let pos = session
            .savepoints
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| DriverError::general(format!("Unknown savepoint {id}")).with_sql_state("3B001"))?;
        let tables = session.savepoints[pos].tables.clone();
        session.working = Some(tables);
        session.savepoints.truncate(pos + 1);
        Ok(())
    }

    fn release_savepoint(&self, savepoint: &dyn RawSavepoint) -> DriverResult<()> {
        let id = savepoint.id()?;
        let mut session = self.transaction_op("release a savepoint")?;
        let pos = session
            .savepoints
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| DriverError::general(format!("Unknown savepoint {id}")).with_sql_state("3B001"))?;
        session.savepoints.truncate(pos);
        Ok(())
    }

    fn transaction_isolation(&self) -> DriverResult<i32> {
        self.inner.ensure_open()?;
        Ok(lock(&self.inner.session).isolation)
    }

    fn set_transaction_isolation(&self, code: i32) -> DriverResult<()> {
        self.inner.ensure_open()?;
        if TransactionIsolation::from_code(code).is_none() {
            return Err(DriverError::general(format!("Invalid isolation level {code}")));
        }
        lock(&self.inner.session).isolation = code;
        Ok(())
    }

    fn is_read_only(&self) -> DriverResult<bool> {
        self.inner.ensure_open()?;
        Ok(lock(&self.inner.session).read_only)
    }

    fn set_read_only(&self, read_only: bool) -> DriverResult<()> {
        self.inner.ensure_open()?;
        lock(&self.inner.session).read_only = read_only;
        Ok(())
    }

    fn catalog(&self) -> DriverResult<Option<String>> {
        self.inner.ensure_open()?;
        Ok(lock(&self.inner.session).catalog.clone())
    }

    fn set_catalog(&self, catalog: &str) -> DriverResult<()> {
        self.inner.ensure_open()?;
        lock(&self.inner.session).catalog = Some(catalog.to_string());
        Ok(())
    }

    fn metadata(&self) -> DriverResult<Box<dyn RawMetadata>> {
        self.inner.ensure_open()?;
        Ok(Box::new(MemoryMetadata::new(Arc::clone(&self.inner.db))))
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    fn close(&self) -> DriverResult<()> {
        self.inner.close_calls.fetch_add(1, Ordering::SeqCst);
        let mut closed = lock(&self.inner.closed);
        if !*closed {
            *closed = true;
            lock(&self.inner.session).working = None;
            debug!(db = %self.inner.db.name(), "Memory connection closed");
        }
        self.inner.closed_signal.notify_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::memory::MemoryTable;
    use crate::models::{GeneratedKeys, ParamIndex, Value};

    fn setup() -> (Arc<MemoryDatabase>, MemoryConnection) {
        let db = Arc::new(MemoryDatabase::new("test"));
        db.create_table("items", MemoryTable::new(&["id"]));
        db.register_insert("INSERT INTO items VALUES (?)", "items");
        let conn = MemoryConnection::open(Arc::clone(&db), DriverCapabilities::default());
        (db, conn)
    }

    fn insert(conn: &MemoryConnection, id: i64) {
        let mut stmt = conn
            .prepare_statement("INSERT INTO items VALUES (?)", &PrepareSpec::plain())
            .unwrap();
        stmt.set_parameter(&ParamIndex::Position(1), Value::Int(id).into()).unwrap();
        stmt.execute_update(None, &GeneratedKeys::None).unwrap();
    }

    #[test]
    fn test_auto_commit_writes_are_visible() {
        let (db, conn) = setup();
        insert(&conn, 1);
        assert_eq!(db.table("items").unwrap().len(), 1);
    }

    #[test]
    fn test_rollback_discards_changes() {
        let (db, conn) = setup();
        conn.set_auto_commit(false).unwrap();
        insert(&conn, 1);
        assert!(conn.in_transaction());
        assert_eq!(conn.visible_rows("items"), Some(1));
        assert_eq!(db.table("items").unwrap().len(), 0);
        conn.rollback().unwrap();
        assert_eq!(conn.visible_rows("items"), Some(0));
    }

    #[test]
    fn test_commit_publishes_changes() {
        let (db, conn) = setup();
        conn.set_auto_commit(false).unwrap();
        insert(&conn, 1);
        conn.commit().unwrap();
        assert_eq!(db.table("items").unwrap().len(), 1);
        assert!(!conn.in_transaction());
    }

    #[test]
    fn test_savepoint_rollback_keeps_earlier_work() {
        let (_db, conn) = setup();
        conn.set_auto_commit(false).unwrap();
        insert(&conn, 1);
        let sp = conn.set_savepoint(Some("sp1")).unwrap();
        insert(&conn, 2);
        conn.rollback_to_savepoint(sp.as_ref()).unwrap();
        assert_eq!(conn.visible_rows("items"), Some(1));
        assert_eq!(conn.savepoint_count(), 1);
        conn.release_savepoint(sp.as_ref()).unwrap();
        assert_eq!(conn.savepoint_count(), 0);
    }

    #[test]
    fn test_savepoint_requires_transaction() {
        let (_db, conn) = setup();
        assert!(conn.set_savepoint(None).is_err());
    }

    #[test]
    fn test_savepoints_unsupported() {
        let db = Arc::new(MemoryDatabase::new("test"));
        let caps = DriverCapabilities {
            supports_savepoints: false,
            ..Default::default()
        };
        let conn = MemoryConnection::open(db, caps);
        conn.set_auto_commit(false).unwrap();
        assert!(conn.set_savepoint(None).unwrap_err().is_feature_unsupported());
    }

    #[test]
    fn test_close_is_idempotent_and_counted() {
        let (_db, conn) = setup();
        conn.close().unwrap();
        conn.close().unwrap();
        assert!(conn.is_closed());
        assert_eq!(conn.close_calls(), 2);
        assert!(conn.auto_commit().is_err());
    }

    #[test]
    fn test_blocked_thread_released_by_close() {
        let (_db, conn) = setup();
        let other = conn.clone();
        let handle = std::thread::spawn(move || other.inner.wait_until_closed());
        std::thread::sleep(Duration::from_millis(50));
        conn.close().unwrap();
        let err = handle.join().unwrap();
        assert_eq!(err.kind, crate::error::DriverErrorKind::ConnectionClosed);
    }

    #[test]
    fn test_invalid_isolation_rejected() {
        let (_db, conn) = setup();
        assert!(conn.set_transaction_isolation(3).is_err());
        conn.set_transaction_isolation(8).unwrap();
        assert_eq!(conn.transaction_isolation().unwrap(), 8);
    }
}
