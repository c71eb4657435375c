//! Raw driver interface.
//!
//! These traits describe the native, synchronous, blocking driver primitives
//! the managed layer wraps. Every call may block; none of them is expected to
//! be cancellable except by closing the connection from another thread, which
//! is why [`RawConnection`] methods take `&self` and implementations must be
//! `Send + Sync`.
//!
//! - `memory`: scriptable in-memory driver used by tests and the demo binary
//! - `detached`: statement stand-in owned by synthetic statements
//! - `rows`: cursor over materialised rows

pub mod detached;
pub mod memory;
pub mod rows;

use crate::error::{DriverError, DriverResult};
use crate::models::{ColumnMeta, GeneratedKeys, ParamIndex, Parameter, PrepareSpec, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub use detached::DetachedStatement;
pub use memory::{MemoryConnection, MemoryDatabase, MemorySource, MemoryTable};
pub use rows::RowsCursor;

/// Capability queries consulted before attempting operations a driver may not support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverCapabilities {
    pub supports_savepoints: bool,
    /// Native max-rows on statements
    pub supports_result_set_limit: bool,
    /// Absolute cursor positioning
    pub supports_result_set_scroll: bool,
    pub supports_generated_keys: bool,
    pub supports_batch_updates: bool,
}

impl Default for DriverCapabilities {
    fn default() -> Self {
        Self {
            supports_savepoints: true,
            supports_result_set_limit: true,
            supports_result_set_scroll: true,
            supports_generated_keys: true,
            supports_batch_updates: true,
        }
    }
}

/// Warning attached to a connection or statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriverWarning {
    pub message: Option<String>,
    pub sql_state: Option<String>,
    pub vendor_code: i32,
}

impl DriverWarning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            sql_state: None,
            vendor_code: 0,
        }
    }

    /// Some drivers emit warnings carrying neither a message nor a code.
    pub fn is_empty(&self) -> bool {
        self.message.is_none() && self.vendor_code == 0
    }
}

/// Catalog/schema/name filter for metadata lookups. `None` matches everything;
/// names accept SQL `LIKE` patterns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectFilter {
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub name: Option<String>,
}

impl ObjectFilter {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }
}

/// Supplies raw connections to execution contexts.
pub trait ConnectionSource: Send + Sync {
    /// Data source name, used in logs and monitor events.
    fn name(&self) -> &str;

    fn capabilities(&self) -> DriverCapabilities;

    /// Borrow the shared connection. Callers never close it.
    fn get_connection(&self) -> DriverResult<Arc<dyn RawConnection>>;

    /// Open a dedicated physical connection owned by the caller.
    fn open_isolated_connection(&self) -> DriverResult<Arc<dyn RawConnection>>;
}

/// Native connection handle.
pub trait RawConnection: Send + Sync {
    fn create_statement(&self, spec: &PrepareSpec) -> DriverResult<Box<dyn RawStatement>>;

    fn prepare_statement(&self, sql: &str, spec: &PrepareSpec)
    -> DriverResult<Box<dyn RawStatement>>;

    fn prepare_call(&self, sql: &str, spec: &PrepareSpec) -> DriverResult<Box<dyn RawStatement>>;

    fn native_sql(&self, sql: &str) -> DriverResult<String> {
        Ok(sql.to_string())
    }

    fn auto_commit(&self) -> DriverResult<bool>;

    fn set_auto_commit(&self, auto_commit: bool) -> DriverResult<()>;

    fn commit(&self) -> DriverResult<()>;

    fn rollback(&self) -> DriverResult<()>;

    fn set_savepoint(&self, name: Option<&str>) -> DriverResult<Box<dyn RawSavepoint>>;

    fn rollback_to_savepoint(&self, savepoint: &dyn RawSavepoint) -> DriverResult<()>;

    fn release_savepoint(&self, savepoint: &dyn RawSavepoint) -> DriverResult<()>;

    /// Native isolation code.
    fn transaction_isolation(&self) -> DriverResult<i32>;

    fn set_transaction_isolation(&self, code: i32) -> DriverResult<()>;

    fn is_read_only(&self) -> DriverResult<bool> {
        Ok(false)
    }

    fn set_read_only(&self, _read_only: bool) -> DriverResult<()> {
        Err(DriverError::unsupported("read-only connections"))
    }

    fn catalog(&self) -> DriverResult<Option<String>> {
        Ok(None)
    }

    fn set_catalog(&self, _catalog: &str) -> DriverResult<()> {
        Err(DriverError::unsupported("catalog switching"))
    }

    fn metadata(&self) -> DriverResult<Box<dyn RawMetadata>>;

    fn warnings(&self) -> DriverResult<Vec<DriverWarning>> {
        Ok(Vec::new())
    }

    fn clear_warnings(&self) -> DriverResult<()> {
        Ok(())
    }

    fn is_closed(&self) -> bool;

    /// Close the connection. Must be callable from a thread other than the
    /// one blocked inside a call on this connection.
    fn close(&self) -> DriverResult<()>;
}

/// Native savepoint handle.
pub trait RawSavepoint: Send + Sync + fmt::Debug {
    /// Fails for named savepoints on most drivers.
    fn id(&self) -> DriverResult<i64>;

    /// Fails for anonymous savepoints on most drivers.
    fn name(&self) -> DriverResult<String>;
}

/// Native statement handle.
///
/// `sql` is `None` for prepared and callable statements, which execute the
/// text they were prepared with.
pub trait RawStatement: Send {
    fn execute(&mut self, sql: Option<&str>, keys: &GeneratedKeys) -> DriverResult<bool>;

    fn execute_query(&mut self, sql: Option<&str>) -> DriverResult<Box<dyn RawCursor>>;

    fn execute_update(&mut self, sql: Option<&str>, keys: &GeneratedKeys) -> DriverResult<i64>;

    fn add_batch(&mut self, sql: Option<&str>) -> DriverResult<()>;

    fn clear_batch(&mut self) -> DriverResult<()>;

    fn execute_batch(&mut self) -> DriverResult<Vec<i64>>;

    fn result_set(&mut self) -> DriverResult<Option<Box<dyn RawCursor>>>;

    fn generated_keys(&mut self) -> DriverResult<Option<Box<dyn RawCursor>>>;

    /// -1 when the current result is a cursor or there are no more results.
    fn update_count(&mut self) -> DriverResult<i64>;

    fn more_results(&mut self) -> DriverResult<bool>;

    /// 0 means unlimited.
    fn set_max_rows(&mut self, max: u64) -> DriverResult<()>;

    fn max_rows(&self) -> DriverResult<u64>;

    fn set_query_timeout(&mut self, secs: u32) -> DriverResult<()>;

    fn query_timeout(&self) -> DriverResult<u32>;

    fn set_fetch_size(&mut self, _rows: u32) -> DriverResult<()> {
        Ok(())
    }

    fn fetch_size(&self) -> DriverResult<u32> {
        Ok(0)
    }

    fn cancel(&mut self) -> DriverResult<()> {
        Err(DriverError::unsupported("statement cancel"))
    }

    fn warnings(&self) -> DriverResult<Vec<DriverWarning>> {
        Ok(Vec::new())
    }

    fn clear_warnings(&mut self) -> DriverResult<()> {
        Ok(())
    }

    fn set_parameter(&mut self, _index: &ParamIndex, _value: Parameter) -> DriverResult<()> {
        Err(DriverError::unsupported("parameter binding"))
    }

    fn clear_parameters(&mut self) -> DriverResult<()> {
        Ok(())
    }

    fn register_out_parameter(&mut self, _index: &ParamIndex, _sql_type: i32) -> DriverResult<()> {
        Err(DriverError::unsupported("out parameters"))
    }

    fn out_parameter(&self, _index: &ParamIndex) -> DriverResult<Value> {
        Err(DriverError::unsupported("out parameters"))
    }

    fn close(&mut self) -> DriverResult<()>;
}

/// Native result cursor.
pub trait RawCursor: Send {
    fn next(&mut self) -> DriverResult<bool>;

    /// Position on the 1-based `row`; 0 positions before the first row.
    fn absolute(&mut self, _row: u64) -> DriverResult<bool> {
        Err(DriverError::unsupported("absolute positioning"))
    }

    fn columns(&self) -> DriverResult<Vec<ColumnMeta>>;

    /// 0-based column ordinal.
    fn get(&self, index: usize) -> DriverResult<Value>;

    fn column_index(&self, name: &str) -> DriverResult<usize> {
        self.columns()?
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                DriverError::general(format!("Column not found: {name}")).with_sql_state("42703")
            })
    }

    fn get_by_name(&self, name: &str) -> DriverResult<Value> {
        self.get(self.column_index(name)?)
    }

    fn cursor_name(&self) -> DriverResult<Option<String>> {
        Ok(None)
    }

    fn close(&mut self) -> DriverResult<()>;
}

/// Native database metadata.
pub trait RawMetadata: Send {
    fn product_name(&self) -> DriverResult<String>;

    fn product_version(&self) -> DriverResult<String>;

    fn driver_name(&self) -> DriverResult<String>;

    fn driver_version(&self) -> DriverResult<String>;

    fn user_name(&self) -> DriverResult<Option<String>> {
        Ok(None)
    }

    fn catalogs(&self) -> DriverResult<Box<dyn RawCursor>>;

    fn schemas(&self) -> DriverResult<Box<dyn RawCursor>>;

    fn tables(&self, filter: &ObjectFilter, types: &[&str]) -> DriverResult<Box<dyn RawCursor>>;

    fn columns(&self, filter: &ObjectFilter, column_pattern: Option<&str>)
    -> DriverResult<Box<dyn RawCursor>>;

    fn primary_keys(&self, filter: &ObjectFilter) -> DriverResult<Box<dyn RawCursor>>;
}
