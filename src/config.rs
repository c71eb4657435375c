//! Configuration handling for the execution layer and the demo binary.
//!
//! [`ExecutionConfig`] is the library-level configuration handed to every
//! execution context. It can be built in code, deserialized, or parsed from CLI
//! arguments and environment variables through the binary's [`Config`].

use clap::{Args, Parser};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_MAX_LABEL_LENGTH: usize = 200;
pub const DEFAULT_DEMO_ROWS: u64 = 10;

/// Shortest label that still identifies a statement.
const MIN_LABEL_LENGTH: usize = 16;

/// Behaviour switches for execution contexts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Args)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Roll back the current transaction when a statement fails
    /// (only while auto-commit is off)
    #[arg(long, env = "DB_EXEC_ROLLBACK_ON_ERROR")]
    pub rollback_on_error: bool,

    /// Maximum length of a progress label; longer query texts are truncated
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_LABEL_LENGTH,
        env = "DB_EXEC_MAX_LABEL_LENGTH"
    )]
    pub max_label_length: usize,

    /// Native query timeout applied to every new statement
    #[arg(long = "query-timeout", env = "DB_EXEC_QUERY_TIMEOUT")]
    pub query_timeout_secs: Option<u32>,

    /// Fetch size hint applied to every new statement
    #[arg(long, env = "DB_EXEC_FETCH_SIZE")]
    pub fetch_size: Option<u32>,

    /// Report statement and result lifecycle events to the monitor
    #[arg(
        long,
        default_value_t = true,
        action = clap::ArgAction::Set,
        env = "DB_EXEC_MONITOR"
    )]
    pub monitor_enabled: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            rollback_on_error: false,
            max_label_length: DEFAULT_MAX_LABEL_LENGTH,
            query_timeout_secs: None,
            fetch_size: None,
            monitor_enabled: true,
        }
    }
}

impl ExecutionConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_label_length < MIN_LABEL_LENGTH {
            return Err(format!(
                "max_label_length ({}) must be at least {}",
                self.max_label_length, MIN_LABEL_LENGTH
            ));
        }
        if self.query_timeout_secs == Some(0) {
            return Err("query_timeout_secs must be greater than 0 when set".to_string());
        }
        if self.fetch_size == Some(0) {
            return Err("fetch_size must be greater than 0 when set".to_string());
        }
        Ok(())
    }

    /// Get the query timeout as a Duration.
    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_secs
            .map(|secs| Duration::from_secs(u64::from(secs)))
    }

    /// Truncate `label` to the configured length on a character boundary.
    pub fn truncate_label(&self, label: &str) -> String {
        match label.char_indices().nth(self.max_label_length) {
            Some((cut, _)) => format!("{}...", &label[..cut]),
            None => label.to_string(),
        }
    }
}

/// Configuration for the demo binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "db-exec",
    about = "Run a paginated query through the managed execution layer against an in-memory database",
    version,
    author
)]
pub struct Config {
    #[command(flatten)]
    pub execution: ExecutionConfig,

    /// Rows in the generated demo table
    #[arg(long, default_value_t = DEFAULT_DEMO_ROWS, env = "DB_EXEC_ROWS")]
    pub rows: u64,

    /// Rows to skip before the first returned row
    #[arg(long, default_value_t = 0, env = "DB_EXEC_OFFSET")]
    pub offset: u64,

    /// Maximum rows to return (0 = all)
    #[arg(long, default_value_t = 0, env = "DB_EXEC_LIMIT")]
    pub limit: u64,

    /// Run on a dedicated connection instead of the shared one
    #[arg(long, env = "DB_EXEC_ISOLATED")]
    pub isolated: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "DB_EXEC_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "DB_EXEC_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            execution: ExecutionConfig::default(),
            rows: DEFAULT_DEMO_ROWS,
            offset: 0,
            limit: 0,
            isolated: false,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.execution.validate()?;
        if self.offset > self.rows {
            return Err(format!(
                "offset ({}) cannot exceed the number of rows ({})",
                self.offset, self.rows
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}
