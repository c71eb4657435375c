//! Scriptable in-memory driver.
//!
//! SQL text is not parsed. Every statement the driver should understand is
//! registered on a [`MemoryDatabase`] ahead of time: a fixed row set, a
//! table scan, an update handler mutating the tables, a stored procedure,
//! an injected failure, or a statement that blocks until its connection is
//! closed from another thread. Transactions work on a copy of the committed
//! tables, so commit, rollback and savepoints behave like a real engine.

mod connection;
mod metadata;
mod statement;

pub use connection::{MemoryConnection, MemorySavepoint};
pub use metadata::MemoryMetadata;
pub use statement::MemoryStatement;

use super::{ConnectionSource, DriverCapabilities, DriverWarning, RawConnection};
use crate::error::{DriverError, DriverResult};
use crate::models::{ColumnMeta, Value};
use crate::sync::lock;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Named tables of a memory database.
pub type Tables = BTreeMap<String, MemoryTable>;

/// Mutates the tables for an update statement; returns the affected row count.
pub type UpdateHandler = Arc<dyn Fn(&mut Tables, &[Value]) -> DriverResult<i64> + Send + Sync>;

/// Computes the out parameters of a procedure call, in registration order,
/// from its positional in parameters.
pub type ProcedureHandler = Arc<dyn Fn(&[Value]) -> DriverResult<Vec<Value>> + Send + Sync>;

/// Rows of one table or one scripted result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryTable {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Vec<Value>>,
}

impl MemoryTable {
    pub fn new(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| ColumnMeta::new(*c, "ANY")).collect(),
            rows: Vec::new(),
        }
    }

    pub fn with_rows(mut self, rows: Vec<Vec<Value>>) -> Self {
        self.rows = rows;
        self
    }

    pub fn push(&mut self, row: Vec<Value>) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// What the driver does when it sees a registered SQL text.
#[derive(Clone)]
pub(crate) enum Script {
    Rows(MemoryTable),
    Scan(String),
    Update(UpdateHandler),
    Procedure(ProcedureHandler),
    Fail(DriverError),
    Block,
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rows(t) => write!(f, "Rows({} rows)", t.len()),
            Self::Scan(name) => write!(f, "Scan({name})"),
            Self::Update(_) => f.write_str("Update"),
            Self::Procedure(_) => f.write_str("Procedure"),
            Self::Fail(err) => write!(f, "Fail({err})"),
            Self::Block => f.write_str("Block"),
        }
    }
}

/// Committed state plus the registry of understood statements.
pub struct MemoryDatabase {
    name: String,
    tables: Mutex<Tables>,
    scripts: Mutex<HashMap<String, Script>>,
    warnings: Mutex<HashMap<String, Vec<DriverWarning>>>,
    rollback_failure: Mutex<Option<DriverError>>,
    next_key: AtomicI64,
}

impl MemoryDatabase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: Mutex::new(Tables::new()),
            scripts: Mutex::new(HashMap::new()),
            warnings: Mutex::new(HashMap::new()),
            rollback_failure: Mutex::new(None),
            next_key: AtomicI64::new(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create or replace a committed table.
    pub fn create_table(&self, name: impl Into<String>, table: MemoryTable) {
        lock(&self.tables).insert(name.into(), table);
    }

    /// Committed rows of a table.
    pub fn table(&self, name: &str) -> Option<MemoryTable> {
        lock(&self.tables).get(name).cloned()
    }

    pub fn table_names(&self) -> Vec<String> {
        lock(&self.tables).keys().cloned().collect()
    }

    /// `sql` returns a fixed row set.
    pub fn register_query(&self, sql: &str, rows: MemoryTable) {
        self.register(sql, Script::Rows(rows));
    }

    /// `sql` returns every row of `table` as visible to the executing connection.
    pub fn register_scan(&self, sql: &str, table: &str) {
        self.register(sql, Script::Scan(table.to_string()));
    }

    /// `sql` runs `handler` against the connection's view of the tables.
    pub fn register_update<F>(&self, sql: &str, handler: F)
    where
        F: Fn(&mut Tables, &[Value]) -> DriverResult<i64> + Send + Sync + 'static,
    {
        self.register(sql, Script::Update(Arc::new(handler)));
    }

    /// `sql` appends its positional parameters as a row of `table`.
    pub fn register_insert(&self, sql: &str, table: &str) {
        let table = table.to_string();
        self.register_update(sql, move |tables, params| {
            let target = tables.get_mut(&table).ok_or_else(|| {
                DriverError::general(format!("Table not found: {table}")).with_sql_state("42P01")
            })?;
            target.push(params.to_vec());
            Ok(1)
        });
    }

    /// `sql` is a procedure call computing its out parameters with `handler`.
    pub fn register_procedure<F>(&self, sql: &str, handler: F)
    where
        F: Fn(&[Value]) -> DriverResult<Vec<Value>> + Send + Sync + 'static,
    {
        self.register(sql, Script::Procedure(Arc::new(handler)));
    }

    /// `sql` fails with `error`.
    pub fn register_failure(&self, sql: &str, error: DriverError) {
        self.register(sql, Script::Fail(error));
    }

    /// `sql` blocks until its connection is closed, then fails.
    pub fn register_blocking(&self, sql: &str) {
        self.register(sql, Script::Block);
    }

    /// Executing `sql` leaves `warnings` on the statement.
    pub fn register_warnings(&self, sql: &str, warnings: Vec<DriverWarning>) {
        lock(&self.warnings).insert(normalize(sql), warnings);
    }

    /// Every full rollback fails with `error` and leaves the transaction as is.
    pub fn fail_rollbacks(&self, error: DriverError) {
        *lock(&self.rollback_failure) = Some(error);
    }

    pub(crate) fn rollback_failure(&self) -> Option<DriverError> {
        lock(&self.rollback_failure).clone()
    }

    fn register(&self, sql: &str, script: Script) {
        debug!(sql = %sql, script = ?script, "Registering memory statement");
        lock(&self.scripts).insert(normalize(sql), script);
    }

    pub(crate) fn script(&self, sql: &str) -> Option<Script> {
        lock(&self.scripts).get(&normalize(sql)).cloned()
    }

    pub(crate) fn warnings_for(&self, sql: &str) -> Vec<DriverWarning> {
        lock(&self.warnings)
            .get(&normalize(sql))
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn next_key(&self) -> i64 {
        self.next_key.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn committed(&self) -> std::sync::MutexGuard<'_, Tables> {
        lock(&self.tables)
    }
}

impl fmt::Debug for MemoryDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDatabase")
            .field("name", &self.name)
            .field("tables", &self.table_names())
            .finish_non_exhaustive()
    }
}

fn normalize(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Connection source over a memory database.
///
/// Hands out one shared connection and opens a fresh connection for every
/// isolated request. Isolated connections are remembered so tests can check
/// they were closed.
pub struct MemorySource {
    name: String,
    db: Arc<MemoryDatabase>,
    capabilities: DriverCapabilities,
    shared: MemoryConnection,
    isolated: Mutex<Vec<MemoryConnection>>,
    refuse_connections: AtomicBool,
}

impl MemorySource {
    pub fn new(db: Arc<MemoryDatabase>) -> Self {
        Self::with_capabilities(db, DriverCapabilities::default())
    }

    pub fn with_capabilities(db: Arc<MemoryDatabase>, capabilities: DriverCapabilities) -> Self {
        let shared = MemoryConnection::open(Arc::clone(&db), capabilities);
        Self {
            name: db.name().to_string(),
            db,
            capabilities,
            shared,
            isolated: Mutex::new(Vec::new()),
            refuse_connections: AtomicBool::new(false),
        }
    }

    pub fn database(&self) -> &Arc<MemoryDatabase> {
        &self.db
    }

    pub fn shared_connection(&self) -> &MemoryConnection {
        &self.shared
    }

    /// Every isolated connection opened so far, oldest first.
    pub fn isolated_connections(&self) -> Vec<MemoryConnection> {
        lock(&self.isolated).clone()
    }

    /// Make subsequent connection requests fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    fn check_accepting(&self) -> DriverResult<()> {
        if self.refuse_connections.load(Ordering::SeqCst) {
            return Err(DriverError::general(format!(
                "Connection to '{}' refused",
                self.name
            ))
            .with_sql_state("08001"));
        }
        Ok(())
    }
}

impl ConnectionSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> DriverCapabilities {
        self.capabilities
    }

    fn get_connection(&self) -> DriverResult<Arc<dyn RawConnection>> {
        self.check_accepting()?;
        Ok(Arc::new(self.shared.clone()))
    }

    fn open_isolated_connection(&self) -> DriverResult<Arc<dyn RawConnection>> {
        self.check_accepting()?;
        let conn = MemoryConnection::open(Arc::clone(&self.db), self.capabilities);
        lock(&self.isolated).push(conn.clone());
        debug!(source = %self.name, "Opened isolated memory connection");
        Ok(Arc::new(conn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(normalize("  SELECT *\n  FROM t "), "SELECT * FROM t");
    }

    #[test]
    fn test_registered_scripts_match_normalized_sql() {
        let db = MemoryDatabase::new("test");
        db.register_query("SELECT 1", MemoryTable::new(&["one"]));
        assert!(db.script("SELECT   1").is_some());
        assert!(db.script("SELECT 2").is_none());
    }

    #[test]
    fn test_source_refuses_connections() {
        let source = MemorySource::new(Arc::new(MemoryDatabase::new("test")));
        source.refuse_connections(true);
        let err = source.get_connection().err().unwrap();
        assert_eq!(err.sql_state.as_deref(), Some("08001"));
        source.refuse_connections(false);
        assert!(source.get_connection().is_ok());
    }

    #[test]
    fn test_isolated_connections_are_tracked() {
        let source = MemorySource::new(Arc::new(MemoryDatabase::new("test")));
        let conn = source.open_isolated_connection().unwrap();
        assert_eq!(source.isolated_connections().len(), 1);
        conn.close().unwrap();
        assert!(source.isolated_connections()[0].is_closed());
        assert!(!source.shared_connection().is_closed());
    }

    #[test]
    fn test_keys_are_sequential() {
        let db = MemoryDatabase::new("test");
        assert_eq!(db.next_key(), 1);
        assert_eq!(db.next_key(), 2);
    }
}
