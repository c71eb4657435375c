//! Managed execution layer over blocking database drivers.
//!
//! Wraps raw connection, statement and cursor handles with lifecycle
//! monitoring, progress blocks, cross-thread cancellation, offset/limit
//! emulation and savepoint ownership checks. A scriptable in-memory driver is
//! included for tests and the demo binary.

pub mod config;
pub mod db;
pub mod driver;
pub mod error;
pub mod models;
pub mod monitor;
mod sync;

pub use config::{Config, ExecutionConfig};
pub use db::{ExecutionContext, ManagedStatement, ResultFetcher};
pub use error::{DriverError, ExecError, ExecResult};
