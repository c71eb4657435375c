use super::connection::ConnectionInner;
use super::{MemoryTable, Script};
use crate::driver::{DriverWarning, RawCursor, RawStatement, RowsCursor};
use crate::error::{DriverError, DriverResult};
use crate::models::{GeneratedKeys, ParamIndex, Parameter, PrepareSpec, ResultSetType, Value};
use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum StatementMode {
    Plain,
    Prepared,
    Callable,
}

enum Outcome {
    Rows(RowsCursor),
    Count(i64),
}

struct Batched {
    sql: String,
    params: Vec<Value>,
}

/// Statement on a memory connection.
pub struct MemoryStatement {
    conn: Arc<ConnectionInner>,
    sql: Option<String>,
    mode: StatementMode,
    scrollable: bool,
    prepared_keys: GeneratedKeys,
    params: BTreeMap<ParamIndex, Value>,
    out_params: BTreeMap<ParamIndex, i32>,
    out_values: BTreeMap<ParamIndex, Value>,
    batch: Vec<Batched>,
    max_rows: u64,
    query_timeout: u32,
    fetch_size: u32,
    current: Option<RowsCursor>,
    generated: Option<RowsCursor>,
    update_count: i64,
    warnings: Vec<DriverWarning>,
    closed: bool,
}

impl MemoryStatement {
    pub(super) fn new(
        conn: Arc<ConnectionInner>,
        sql: Option<String>,
        mode: StatementMode,
        spec: &PrepareSpec,
    ) -> Self {
        Self {
            conn,
            sql,
            mode,
            scrollable: spec.result_set_type != ResultSetType::ForwardOnly,
            prepared_keys: spec.generated_keys.clone(),
            params: BTreeMap::new(),
            out_params: BTreeMap::new(),
            out_values: BTreeMap::new(),
            batch: Vec::new(),
            max_rows: 0,
            query_timeout: 0,
            fetch_size: 0,
            current: None,
            generated: None,
            update_count: -1,
            warnings: Vec::new(),
            closed: false,
        }
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.closed {
            return Err(DriverError::closed("Statement is closed"));
        }
        self.conn.ensure_open()
    }

    fn resolve_sql(&self, sql: Option<&str>) -> DriverResult<String> {
        match (self.mode, sql, &self.sql) {
            (StatementMode::Plain, Some(sql), _) => Ok(sql.to_string()),
            (StatementMode::Plain, None, _) => {
                Err(DriverError::general("No SQL given to a plain statement").with_sql_state("07003"))
            }
            (_, None, Some(prepared)) => Ok(prepared.clone()),
            (_, Some(_), _) | (_, None, None) => Err(DriverError::general(
                "SQL text cannot be passed to a prepared statement",
            )
            .with_sql_state("07003")),
        }
    }

    /// Positional parameters in placeholder order.
    fn positional_values(&self) -> Vec<Value> {
        self.params
            .iter()
            .filter(|(index, _)| matches!(index, ParamIndex::Position(_)))
            .map(|(_, value)| value.clone())
            .collect()
    }

    fn cursor_over(&self, table: MemoryTable) -> RowsCursor {
        let caps = &self.conn.capabilities;
        let mut rows = table.rows;
        if self.max_rows > 0 && caps.supports_result_set_limit {
            let cap = usize::try_from(self.max_rows).unwrap_or(usize::MAX);
            rows.truncate(cap);
        }
        let cursor = RowsCursor::new(table.columns, rows);
        if self.scrollable && caps.supports_result_set_scroll {
            cursor
        } else {
            cursor.forward_only()
        }
    }

    fn key_cursor(&self, count: i64) -> RowsCursor {
        let rows = (0..count.max(0))
            .map(|_| vec![Value::Int(self.conn.db.next_key())])
            .collect();
        RowsCursor::from_names(&["GENERATED_KEY"], rows)
    }

    fn lookup(&self, sql: &str) -> DriverResult<Script> {
        self.conn.db.script(sql).ok_or_else(|| {
            DriverError::general(format!("Unrecognized statement: {sql}")).with_sql_state("42000")
        })
    }

    fn run(&mut self, sql: Option<&str>, keys: &GeneratedKeys) -> DriverResult<Outcome> {
        self.ensure_open()?;
        let sql = self.resolve_sql(sql)?;
        let wants_keys = keys.is_requested() || self.prepared_keys.is_requested();
        if wants_keys && !self.conn.capabilities.supports_generated_keys {
            return Err(DriverError::unsupported("generated keys"));
        }
        self.current = None;
        self.generated = None;
        self.update_count = -1;
        self.warnings = self.conn.db.warnings_for(&sql);

        match self.lookup(&sql)? {
            Script::Block => Err(self.conn.wait_until_closed()),
            Script::Fail(err) => Err(err),
            Script::Rows(table) => Ok(Outcome::Rows(self.cursor_over(table))),
            Script::Scan(name) => {
                let table = self
                    .conn
                    .read_tables(|tables| tables.get(&name).cloned())
                    .ok_or_else(|| {
                        DriverError::general(format!("Table not found: {name}"))
                            .with_sql_state("42P01")
                    })?;
                Ok(Outcome::Rows(self.cursor_over(table)))
            }
            Script::Update(handler) => {
                let params = self.positional_values();
                let count = self.conn.write_tables(|tables| handler(tables, &params))?;
                if wants_keys {
                    self.generated = Some(self.key_cursor(count));
                }
                Ok(Outcome::Count(count))
            }
            Script::Procedure(handler) => {
                let outs = handler(&self.positional_values())?;
                self.out_values = self.out_params.keys().cloned().zip(outs).collect();
                Ok(Outcome::Count(0))
            }
        }
    }

    fn read_stream(param: Parameter) -> DriverResult<Value> {
        let io_err = |e: std::io::Error| DriverError::general(format!("Failed to read stream: {e}"));
        Ok(match param {
            Parameter::Value(v) => v,
            Parameter::TypedNull { .. } => Value::Null,
            Parameter::BinaryStream { mut reader, .. } => {
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf).map_err(io_err)?;
                Value::Bytes(buf)
            }
            Parameter::CharacterStream { mut reader, .. } => {
                let mut buf = String::new();
                reader.read_to_string(&mut buf).map_err(io_err)?;
                Value::Text(buf)
            }
        })
    }
}

impl RawStatement for MemoryStatement {
    fn execute(&mut self, sql: Option<&str>, keys: &GeneratedKeys) -> DriverResult<bool> {
        match self.run(sql, keys)? {
            Outcome::Rows(cursor) => {
                self.current = Some(cursor);
                Ok(true)
            }
            Outcome::Count(count) => {
                self.update_count = count;
                Ok(false)
            }
        }
    }

    fn execute_query(&mut self, sql: Option<&str>) -> DriverResult<Box<dyn RawCursor>> {
        match self.run(sql, &GeneratedKeys::None)? {
            Outcome::Rows(cursor) => Ok(Box::new(cursor)),
            Outcome::Count(_) => Err(DriverError::general("Statement did not return a result set")),
        }
    }

    fn execute_update(&mut self, sql: Option<&str>, keys: &GeneratedKeys) -> DriverResult<i64> {
        match self.run(sql, keys)? {
            Outcome::Count(count) => {
                self.update_count = count;
                Ok(count)
            }
            Outcome::Rows(_) => Err(DriverError::general("Statement returned a result set")),
        }
    }

    fn add_batch(&mut self, sql: Option<&str>) -> DriverResult<()> {
        self.ensure_open()?;
        let sql = self.resolve_sql(sql)?;
        let params = self.positional_values();
        self.batch.push(Batched { sql, params });
        Ok(())
    }

    fn clear_batch(&mut self) -> DriverResult<()> {
        self.batch.clear();
        Ok(())
    }

    fn execute_batch(&mut self) -> DriverResult<Vec<i64>> {
        self.ensure_open()?;
        if !self.conn.capabilities.supports_batch_updates {
            return Err(DriverError::unsupported("batch updates"));
        }
        let batch = std::mem::take(&mut self.batch);
        let mut counts = Vec::with_capacity(batch.len());
        for entry in batch {
            let Script::Update(handler) = self.lookup(&entry.sql)? else {
                return Err(DriverError::general(format!(
                    "Batch entry is not an update: {}",
                    entry.sql
                ))
                .with_sql_state("22000"));
            };
            counts.push(self.conn.write_tables(|tables| handler(tables, &entry.params))?);
        }
        Ok(counts)
    }

    fn result_set(&mut self) -> DriverResult<Option<Box<dyn RawCursor>>> {
        self.ensure_open()?;
        Ok(self
            .current
            .take()
            .map(|cursor| Box::new(cursor) as Box<dyn RawCursor>))
    }

    fn generated_keys(&mut self) -> DriverResult<Option<Box<dyn RawCursor>>> {
        self.ensure_open()?;
        Ok(self
            .generated
            .take()
            .map(|cursor| Box::new(cursor) as Box<dyn RawCursor>))
    }

    fn update_count(&mut self) -> DriverResult<i64> {
        Ok(self.update_count)
    }

    fn more_results(&mut self) -> DriverResult<bool> {
        self.current = None;
        self.update_count = -1;
        Ok(false)
    }

    fn set_max_rows(&mut self, max: u64) -> DriverResult<()> {
        self.ensure_open()?;
        self.max_rows = max;
        Ok(())
    }

    fn max_rows(&self) -> DriverResult<u64> {
        Ok(self.max_rows)
    }

    fn set_query_timeout(&mut self, secs: u32) -> DriverResult<()> {
        self.query_timeout = secs;
        Ok(())
    }

    fn query_timeout(&self) -> DriverResult<u32> {
        Ok(self.query_timeout)
    }

    fn set_fetch_size(&mut self, rows: u32) -> DriverResult<()> {
        self.fetch_size = rows;
        Ok(())
    }

    fn fetch_size(&self) -> DriverResult<u32> {
        Ok(self.fetch_size)
    }

    fn warnings(&self) -> DriverResult<Vec<DriverWarning>> {
        Ok(self.warnings.clone())
    }

    fn clear_warnings(&mut self) -> DriverResult<()> {
        self.warnings.clear();
        Ok(())
    }

    fn set_parameter(&mut self, index: &ParamIndex, value: Parameter) -> DriverResult<()> {
        self.ensure_open()?;
        match (self.mode, index) {
            (StatementMode::Plain, _) => return Err(DriverError::unsupported("parameters on a plain statement")),
            (StatementMode::Prepared, ParamIndex::Name(_)) => {
                return Err(DriverError::unsupported("named parameters"));
            }
            (_, ParamIndex::Position(0)) => {
                return Err(DriverError::general("Parameter positions start at 1").with_sql_state("07009"));
            }
            _ => {}
        }
        let value = Self::read_stream(value)?;
        self.params.insert(index.clone(), value);
        Ok(())
    }

    fn clear_parameters(&mut self) -> DriverResult<()> {
        self.params.clear();
        Ok(())
    }

    fn register_out_parameter(&mut self, index: &ParamIndex, sql_type: i32) -> DriverResult<()> {
        self.ensure_open()?;
        if self.mode != StatementMode::Callable {
            return Err(DriverError::unsupported("out parameters"));
        }
        self.out_params.insert(index.clone(), sql_type);
        Ok(())
    }

    fn out_parameter(&self, index: &ParamIndex) -> DriverResult<Value> {
        self.out_values.get(index).cloned().ok_or_else(|| {
            DriverError::general(format!("Out parameter {index} has no value")).with_sql_state("07009")
        })
    }

    fn close(&mut self) -> DriverResult<()> {
        self.closed = true;
        self.current = None;
        self.generated = None;
        Ok(())
    }
}
