//! Cursor over rows already held in memory.

use super::RawCursor;
use crate::error::{DriverError, DriverResult};
use crate::models::{ColumnMeta, Value};

/// Scrollable cursor over a materialised row set.
#[derive(Debug, Clone)]
pub struct RowsCursor {
    columns: Vec<ColumnMeta>,
    rows: Vec<Vec<Value>>,
    /// 0 = before first, `rows.len() + 1` = after last
    position: usize,
    scrollable: bool,
    closed: bool,
    name: Option<String>,
}

impl RowsCursor {
    pub fn new(columns: Vec<ColumnMeta>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            rows,
            position: 0,
            scrollable: true,
            closed: false,
            name: None,
        }
    }

    /// Build a cursor whose columns are untyped and named `names`.
    pub fn from_names(names: &[&str], rows: Vec<Vec<Value>>) -> Self {
        let columns = names.iter().map(|n| ColumnMeta::new(*n, "ANY")).collect();
        Self::new(columns, rows)
    }

    /// Disable absolute positioning.
    pub fn forward_only(mut self) -> Self {
        self.scrollable = false;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.closed {
            return Err(DriverError::closed("Cursor is closed").with_sql_state("24000"));
        }
        Ok(())
    }

    fn current_row(&self) -> DriverResult<&Vec<Value>> {
        self.ensure_open()?;
        if self.position == 0 || self.position > self.rows.len() {
            return Err(DriverError::general("No current row").with_sql_state("24000"));
        }
        self.rows
            .get(self.position - 1)
            .ok_or_else(|| DriverError::general("No current row").with_sql_state("24000"))
    }
}

impl RawCursor for RowsCursor {
    fn next(&mut self) -> DriverResult<bool> {
        self.ensure_open()?;
        if self.position <= self.rows.len() {
            self.position += 1;
        }
        Ok(self.position <= self.rows.len())
    }

    fn absolute(&mut self, row: u64) -> DriverResult<bool> {
        self.ensure_open()?;
        if !self.scrollable {
            return Err(DriverError::unsupported("absolute positioning on forward-only cursor"));
        }
        let len = self.rows.len();
        match usize::try_from(row) {
            Ok(row) if row <= len => {
                self.position = row;
                Ok(row > 0)
            }
            _ => {
                self.position = len + 1;
                Ok(false)
            }
        }
    }

    fn columns(&self) -> DriverResult<Vec<ColumnMeta>> {
        Ok(self.columns.clone())
    }

    fn get(&self, index: usize) -> DriverResult<Value> {
        self.current_row()?.get(index).cloned().ok_or_else(|| {
            DriverError::general(format!("Column index {index} out of range")).with_sql_state("07009")
        })
    }

    fn cursor_name(&self) -> DriverResult<Option<String>> {
        Ok(self.name.clone())
    }

    fn close(&mut self) -> DriverResult<()> {
        self.closed = true;
        Ok(())
    }
}
