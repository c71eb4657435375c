//! Managed execution layer.
//!
//! Wraps raw driver handles with lifecycle tracking:
//! - Execution contexts (shared or isolated connections, cancellation)
//! - Statements, prepared statements and procedure calls
//! - Result fetchers with offset/limit emulation
//! - Transaction control and savepoints
//! - Metadata lookups as synthetic results

pub mod callable;
mod cancel;
pub mod cleanup;
pub mod context;
pub mod fetcher;
pub mod metadata;
pub mod prepared;
pub mod statement;
pub mod transaction;

pub use callable::CallableStatement;
pub use cleanup::best_effort;
pub use context::{CancelHandle, ContextBuilder, ExecutionContext, TypedStatement};
pub use fetcher::{FetchHook, ResultFetcher};
pub use metadata::{DatabaseMetadata, ProductInfo};
pub use prepared::PreparedStatement;
pub use statement::ManagedStatement;
pub use transaction::{SavepointHandle, TransactionManager};
