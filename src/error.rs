//! Error types for the managed execution layer.
//!
//! Two layers of errors exist. [`DriverError`] is what a raw driver handle
//! reports; it travels through this crate unchanged. [`ExecError`] is the
//! taxonomy exposed to callers, wrapping driver failures and adding the
//! conditions this layer detects on its own (cancellation, unsupported
//! capabilities, foreign savepoints).

use serde::Serialize;
use thiserror::Error;

/// Classification attached to every [`DriverError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverErrorKind {
    /// Wrong SQL, constraint violation and everything else the driver reports.
    General,
    /// The driver does not implement the requested feature.
    FeatureNotSupported,
    /// The connection was closed underneath the call.
    ConnectionClosed,
    /// The driver's native query timeout expired.
    Timeout,
}

/// Failure reported by a raw driver handle.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{message}")]
pub struct DriverError {
    pub kind: DriverErrorKind,
    pub message: String,
    /// e.g., "42P01" for undefined table
    pub sql_state: Option<String>,
    pub vendor_code: i32,
}

impl DriverError {
    /// Create a general driver error.
    pub fn general(message: impl Into<String>) -> Self {
        Self {
            kind: DriverErrorKind::General,
            message: message.into(),
            sql_state: None,
            vendor_code: 0,
        }
    }

    /// Create a "feature not supported" error (SQLSTATE 0A000).
    pub fn unsupported(feature: impl Into<String>) -> Self {
        Self {
            kind: DriverErrorKind::FeatureNotSupported,
            message: format!("Feature not supported: {}", feature.into()),
            sql_state: Some("0A000".to_string()),
            vendor_code: 0,
        }
    }

    /// Create a "connection closed" error (SQLSTATE 08003).
    pub fn closed(message: impl Into<String>) -> Self {
        Self {
            kind: DriverErrorKind::ConnectionClosed,
            message: message.into(),
            sql_state: Some("08003".to_string()),
            vendor_code: 0,
        }
    }

    /// Create a query timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: DriverErrorKind::Timeout,
            message: message.into(),
            sql_state: Some("HYT00".to_string()),
            vendor_code: 0,
        }
    }

    pub fn with_sql_state(mut self, sql_state: impl Into<String>) -> Self {
        self.sql_state = Some(sql_state.into());
        self
    }

    pub fn with_vendor_code(mut self, vendor_code: i32) -> Self {
        self.vendor_code = vendor_code;
        self
    }

    /// Check if the driver rejected the call as an unsupported feature.
    pub fn is_feature_unsupported(&self) -> bool {
        self.kind == DriverErrorKind::FeatureNotSupported
    }
}

/// Result type alias for raw driver calls.
pub type DriverResult<T> = Result<T, DriverError>;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Connection failed: {message}")]
    Connection {
        message: String,
        suggestion: String,
        #[source]
        source: Option<DriverError>,
    },

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Operation cancelled: {operation}")]
    Cancelled {
        operation: String,
        /// The driver failure the forced close produced in the blocked call.
        #[source]
        source: DriverError,
    },

    #[error("Unsupported operation: {operation}")]
    UnsupportedOperation { operation: String },

    #[error("Unsupported transaction isolation level: {code}")]
    UnsupportedIsolationLevel { code: i32 },

    #[error("Invalid savepoint: {reason}")]
    InvalidSavepoint { reason: String },

    #[error("{object} is closed")]
    Closed { object: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ExecError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
            source: None,
        }
    }

    /// Create a connection error caused by a driver failure.
    pub fn connection_failed(source: DriverError, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: source.message.clone(),
            suggestion: suggestion.into(),
            source: Some(source),
        }
    }

    /// Create a cancellation error from the driver failure it produced.
    pub fn cancelled(operation: impl Into<String>, source: DriverError) -> Self {
        Self::Cancelled {
            operation: operation.into(),
            source,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create an unsupported operation error.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            operation: operation.into(),
        }
    }

    /// Create an unsupported isolation level error.
    pub fn unsupported_isolation(code: i32) -> Self {
        Self::UnsupportedIsolationLevel { code }
    }

    /// Create an invalid savepoint error.
    pub fn invalid_savepoint(reason: impl Into<String>) -> Self {
        Self::InvalidSavepoint {
            reason: reason.into(),
        }
    }

    /// Create a closed-object error.
    pub fn closed(object: impl Into<String>) -> Self {
        Self::Closed {
            object: object.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Get the underlying driver failure, if this error carries one.
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            Self::Driver(err) => Some(err),
            Self::Cancelled { source, .. } => Some(source),
            Self::Connection { source, .. } => source.as_ref(),
            _ => None,
        }
    }

    /// Check if this error reports a cancellation rather than a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } => true,
            Self::Driver(err) => err.kind == DriverErrorKind::Timeout,
            _ => false,
        }
    }
}

/// Result type alias for managed operations.
pub type ExecResult<T> = Result<T, ExecError>;
