//! Transaction control for an execution context.
//!
//! Savepoint handles remember the context that created them; passing a handle
//! to another context's manager fails with [`ExecError::InvalidSavepoint`]
//! instead of reaching the driver.

use super::context::ExecutionContext;
use crate::driver::RawSavepoint;
use crate::error::{ExecError, ExecResult};
use crate::models::TransactionIsolation;
use crate::monitor::TransactionEvent;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Savepoint created by [`TransactionManager::set_savepoint`].
///
/// Becomes meaningless once the transaction commits or rolls back past it.
#[derive(Debug, Clone)]
pub struct SavepointHandle {
    id: Option<i64>,
    name: Option<String>,
    context_id: Uuid,
    raw: Arc<dyn RawSavepoint>,
}

impl SavepointHandle {
    /// Driver-assigned id; `None` when the driver only names savepoints.
    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Context that created the savepoint.
    pub fn context_id(&self) -> Uuid {
        self.context_id
    }

    /// Name if set, otherwise the id.
    pub fn label(&self) -> String {
        match (&self.name, self.id) {
            (Some(name), _) => name.clone(),
            (None, Some(id)) => id.to_string(),
            (None, None) => "<anonymous>".to_string(),
        }
    }
}

/// Transaction operations of one [`ExecutionContext`].
pub struct TransactionManager<'a> {
    ctx: &'a ExecutionContext,
}

impl<'a> TransactionManager<'a> {
    pub fn new(ctx: &'a ExecutionContext) -> Self {
        Self { ctx }
    }

    fn report(&self, event: TransactionEvent) {
        let inner = self.ctx.inner();
        if let Some(monitor) = inner.monitor() {
            monitor.transaction(inner.id, &event);
        }
    }

    fn check_owner(&self, savepoint: &SavepointHandle) -> ExecResult<()> {
        if savepoint.context_id != self.ctx.id() {
            return Err(ExecError::invalid_savepoint(format!(
                "Savepoint '{}' belongs to context {}",
                savepoint.label(),
                savepoint.context_id
            )));
        }
        Ok(())
    }

    pub fn isolation(&self) -> ExecResult<TransactionIsolation> {
        let code = self.ctx.resolve_connection()?.transaction_isolation()?;
        TransactionIsolation::try_from(code)
    }

    pub fn set_isolation(&self, level: TransactionIsolation) -> ExecResult<()> {
        self.ctx
            .resolve_connection()?
            .set_transaction_isolation(level.code())?;
        debug!(parent: &self.ctx.inner().span, level = %level, "Transaction isolation changed");
        self.report(TransactionEvent::Isolation { level });
        Ok(())
    }

    /// Set the isolation from a native code. Codes outside the known levels
    /// are rejected before reaching the driver.
    pub fn set_isolation_code(&self, code: i32) -> ExecResult<()> {
        let level = TransactionIsolation::try_from(code)?;
        self.set_isolation(level)
    }

    pub fn auto_commit(&self) -> ExecResult<bool> {
        Ok(self.ctx.resolve_connection()?.auto_commit()?)
    }

    pub fn set_auto_commit(&self, enabled: bool) -> ExecResult<()> {
        self.ctx.resolve_connection()?.set_auto_commit(enabled)?;
        debug!(parent: &self.ctx.inner().span, enabled, "Auto-commit changed");
        self.report(TransactionEvent::AutoCommit { enabled });
        Ok(())
    }

    pub fn supports_savepoints(&self) -> bool {
        self.ctx.capabilities().supports_savepoints
    }

    pub fn set_savepoint(&self, name: Option<&str>) -> ExecResult<SavepointHandle> {
        if !self.supports_savepoints() {
            return Err(ExecError::unsupported("savepoints"));
        }
        let raw = self
            .ctx
            .resolve_connection()?
            .set_savepoint(name)
            .map_err(|e| {
                if e.is_feature_unsupported() {
                    ExecError::unsupported("savepoints")
                } else {
                    ExecError::Driver(e)
                }
            })?;
        let handle = SavepointHandle {
            id: raw.id().ok(),
            name: raw.name().ok(),
            context_id: self.ctx.id(),
            raw: Arc::from(raw),
        };
        debug!(parent: &self.ctx.inner().span, savepoint = %handle.label(), "Savepoint set");
        self.report(TransactionEvent::Savepoint {
            id: handle.id,
            name: handle.name.clone(),
        });
        Ok(handle)
    }

    pub fn release_savepoint(&self, savepoint: &SavepointHandle) -> ExecResult<()> {
        self.check_owner(savepoint)?;
        self.ctx
            .resolve_connection()?
            .release_savepoint(savepoint.raw.as_ref())?;
        self.report(TransactionEvent::ReleaseSavepoint {
            id: savepoint.id,
            name: savepoint.name.clone(),
        });
        Ok(())
    }

    pub fn commit(&self) -> ExecResult<()> {
        self.ctx.resolve_connection()?.commit()?;
        info!(parent: &self.ctx.inner().span, "Transaction committed");
        self.report(TransactionEvent::Commit);
        Ok(())
    }

    /// Roll back the whole transaction, or only the work done after
    /// `savepoint`.
    pub fn rollback(&self, savepoint: Option<&SavepointHandle>) -> ExecResult<()> {
        let conn = self.ctx.resolve_connection()?;
        match savepoint {
            Some(sp) => {
                self.check_owner(sp)?;
                conn.rollback_to_savepoint(sp.raw.as_ref())?;
                info!(parent: &self.ctx.inner().span, savepoint = %sp.label(), "Rolled back to savepoint");
                self.report(TransactionEvent::Rollback {
                    savepoint: Some(sp.label()),
                });
            }
            None => {
                conn.rollback()?;
                info!(parent: &self.ctx.inner().span, "Transaction rolled back");
                self.report(TransactionEvent::Rollback { savepoint: None });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverCapabilities, MemoryDatabase, MemorySource, MemoryTable};
    use crate::models::StatementOptions;
    use crate::monitor::{EventKind, RecordingMonitor};

    fn setup(caps: DriverCapabilities) -> (Arc<MemorySource>, ExecutionContext, Arc<RecordingMonitor>) {
        let db = Arc::new(MemoryDatabase::new("tx"));
        db.create_table("items", MemoryTable::new(&["name"]));
        db.register_insert("INSERT INTO items VALUES ('x')", "items");
        let source = Arc::new(MemorySource::with_capabilities(db, caps));
        let monitor = Arc::new(RecordingMonitor::new());
        let ctx = ExecutionContext::builder(source.clone())
            .monitor(monitor.clone())
            .build()
            .unwrap();
        (source, ctx, monitor)
    }

    fn insert(ctx: &ExecutionContext) {
        let mut stmt = ctx.create_statement(&StatementOptions::new()).unwrap();
        stmt.execute_update("INSERT INTO items VALUES ('x')").unwrap();
    }

    #[test]
    fn test_commit_and_rollback() {
        let (source, ctx, monitor) = setup(DriverCapabilities::default());
        let tx = ctx.transaction_manager();
        tx.set_auto_commit(false).unwrap();
        insert(&ctx);
        tx.rollback(None).unwrap();
        assert_eq!(source.database().table("items").unwrap().len(), 0);
        insert(&ctx);
        tx.commit().unwrap();
        assert_eq!(source.database().table("items").unwrap().len(), 1);
        assert_eq!(
            monitor.count(|k| matches!(
                k,
                EventKind::Transaction {
                    transaction: TransactionEvent::Commit,
                    ..
                }
            )),
            1
        );
    }

    #[test]
    fn test_isolation_round_trip() {
        let (_source, ctx, _) = setup(DriverCapabilities::default());
        let tx = ctx.transaction_manager();
        assert_eq!(tx.isolation().unwrap(), TransactionIsolation::ReadCommitted);
        tx.set_isolation(TransactionIsolation::Serializable).unwrap();
        assert_eq!(tx.isolation().unwrap(), TransactionIsolation::Serializable);
    }

    #[test]
    fn test_unknown_isolation_code_rejected() {
        let (_source, ctx, _) = setup(DriverCapabilities::default());
        let tx = ctx.transaction_manager();
        let err = tx.set_isolation_code(3).unwrap_err();
        assert!(matches!(err, ExecError::UnsupportedIsolationLevel { code: 3 }));
        assert_eq!(tx.isolation().unwrap(), TransactionIsolation::ReadCommitted);
    }

    #[test]
    fn test_savepoints_unsupported() {
        let (_source, ctx, _) = setup(DriverCapabilities {
            supports_savepoints: false,
            ..Default::default()
        });
        let tx = ctx.transaction_manager();
        tx.set_auto_commit(false).unwrap();
        let err = tx.set_savepoint(Some("s1")).unwrap_err();
        assert!(matches!(err, ExecError::UnsupportedOperation { .. }));
    }

    #[test]
    fn test_foreign_savepoint_rejected() {
        let (source, ctx, _) = setup(DriverCapabilities::default());
        let other = ExecutionContext::open(source.clone()).unwrap();
        ctx.set_auto_commit(false).unwrap();
        let sp = ctx.transaction_manager().set_savepoint(Some("s1")).unwrap();
        assert_eq!(sp.context_id(), ctx.id());

        let err = other.rollback(Some(&sp)).unwrap_err();
        assert!(matches!(err, ExecError::InvalidSavepoint { .. }));
        let err = other.transaction_manager().release_savepoint(&sp).unwrap_err();
        assert!(matches!(err, ExecError::InvalidSavepoint { .. }));
        // The savepoint is untouched by the rejected calls.
        ctx.rollback(Some(&sp)).unwrap();
    }

    #[test]
    fn test_release_savepoint() {
        let (source, ctx, monitor) = setup(DriverCapabilities::default());
        let tx = ctx.transaction_manager();
        tx.set_auto_commit(false).unwrap();
        let sp = tx.set_savepoint(None).unwrap();
        assert_eq!(sp.id(), Some(1));
        assert_eq!(sp.name(), None);
        tx.release_savepoint(&sp).unwrap();
        assert_eq!(source.shared_connection().savepoint_count(), 0);
        assert_eq!(
            monitor.count(|k| matches!(
                k,
                EventKind::Transaction {
                    transaction: TransactionEvent::ReleaseSavepoint { id: Some(1), .. },
                    ..
                }
            )),
            1
        );
    }
}
