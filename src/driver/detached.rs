//! Statement handle with no driver behind it.
//!
//! Synthetic statements (owners of cursors that did not come from a query,
//! such as metadata lookups) still need a raw handle. This one rejects every
//! execution and closes cleanly.

use super::{RawCursor, RawStatement};
use crate::error::{DriverError, DriverResult};
use crate::models::GeneratedKeys;

#[derive(Debug, Default)]
pub struct DetachedStatement {
    closed: bool,
}

impl DetachedStatement {
    pub fn new() -> Self {
        Self::default()
    }

    fn rejected<T>(&self, operation: &str) -> DriverResult<T> {
        if self.closed {
            return Err(DriverError::closed("Statement is closed"));
        }
        Err(DriverError::unsupported(format!(
            "{operation} on a detached statement"
        )))
    }
}

impl RawStatement for DetachedStatement {
    fn execute(&mut self, _sql: Option<&str>, _keys: &GeneratedKeys) -> DriverResult<bool> {
        self.rejected("execute")
    }

    fn execute_query(&mut self, _sql: Option<&str>) -> DriverResult<Box<dyn RawCursor>> {
        self.rejected("execute query")
    }

    fn execute_update(&mut self, _sql: Option<&str>, _keys: &GeneratedKeys) -> DriverResult<i64> {
        self.rejected("execute update")
    }

    fn add_batch(&mut self, _sql: Option<&str>) -> DriverResult<()> {
        self.rejected("add batch")
    }

    fn clear_batch(&mut self) -> DriverResult<()> {
        Ok(())
    }

    fn execute_batch(&mut self) -> DriverResult<Vec<i64>> {
        self.rejected("execute batch")
    }

    fn result_set(&mut self) -> DriverResult<Option<Box<dyn RawCursor>>> {
        Ok(None)
    }

    fn generated_keys(&mut self) -> DriverResult<Option<Box<dyn RawCursor>>> {
        Ok(None)
    }

    fn update_count(&mut self) -> DriverResult<i64> {
        Ok(-1)
    }

    fn more_results(&mut self) -> DriverResult<bool> {
        Ok(false)
    }

    fn set_max_rows(&mut self, _max: u64) -> DriverResult<()> {
        Ok(())
    }

    fn max_rows(&self) -> DriverResult<u64> {
        Ok(0)
    }

    fn set_query_timeout(&mut self, _secs: u32) -> DriverResult<()> {
        Ok(())
    }

    fn query_timeout(&self) -> DriverResult<u32> {
        Ok(0)
    }

    fn close(&mut self) -> DriverResult<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_rejects_execution() {
        let mut stmt = DetachedStatement::new();
        let err = stmt.execute(Some("SELECT 1"), &GeneratedKeys::None).unwrap_err();
        assert!(err.is_feature_unsupported());
        assert_eq!(stmt.update_count().unwrap(), -1);
    }

    #[test]
    fn test_detached_close_is_repeatable() {
        let mut stmt = DetachedStatement::new();
        assert!(stmt.close().is_ok());
        assert!(stmt.close().is_ok());
        let err = stmt.execute_batch().unwrap_err();
        assert_eq!(err.kind, crate::error::DriverErrorKind::ConnectionClosed);
    }
}
