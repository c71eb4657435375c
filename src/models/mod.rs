//! Data models shared by the driver interface and the managed layer.
//!
//! This module re-exports all model types used throughout the crate.

pub mod isolation;
pub mod options;
pub mod statement;
pub mod value;

// Re-export commonly used types
pub use isolation::TransactionIsolation;
pub use options::{
    Concurrency, GeneratedKeys, Holdability, PrepareSpec, ResultSetType, StatementOptions,
    StatementType,
};
pub use statement::{StatementInfo, StatementKind};
pub use value::{ColumnMeta, ParamIndex, Parameter, Value};
