//! Statement creation options.

use serde::{Deserialize, Serialize};

/// Cursor scrolling mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSetType {
    #[default]
    ForwardOnly,
    ScrollInsensitive,
    ScrollSensitive,
}

/// Cursor concurrency mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Concurrency {
    #[default]
    ReadOnly,
    Updatable,
}

/// Whether cursors survive a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Holdability {
    HoldCursorsOverCommit,
    CloseCursorsAtCommit,
}

/// Which generated keys the driver should make available after an insert.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneratedKeys {
    #[default]
    None,
    /// Let the driver decide which columns are keys.
    Auto,
    /// 1-based column indexes
    ColumnIndexes(Vec<usize>),
    ColumnNames(Vec<String>),
}

impl GeneratedKeys {
    pub fn is_requested(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// How a statement factory should treat the SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementType {
    /// Prepared statement.
    Query,
    /// Stored procedure call.
    Exec,
    /// Plain statement; the driver does not pre-parse the text.
    Script,
}

/// Options recognised by the statement factories of an execution context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementOptions {
    pub scrollable: bool,
    pub updatable: bool,
    pub return_generated_keys: bool,
    /// Overrides `scrollable` when set.
    pub result_set_type: Option<ResultSetType>,
    /// Overrides `updatable` when set.
    pub concurrency: Option<Concurrency>,
    pub holdability: Option<Holdability>,
    /// Explicit key columns; implies `return_generated_keys`.
    pub auto_generated_key_columns: Option<Vec<String>>,
    /// Do not report this statement to the monitoring sink.
    #[serde(default)]
    pub disable_monitoring: bool,
}

impl StatementOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scrollable(mut self) -> Self {
        self.scrollable = true;
        self
    }

    pub fn updatable(mut self) -> Self {
        self.updatable = true;
        self
    }

    pub fn with_generated_keys(mut self) -> Self {
        self.return_generated_keys = true;
        self
    }

    pub fn with_key_columns(mut self, columns: Vec<String>) -> Self {
        self.auto_generated_key_columns = Some(columns);
        self
    }

    pub fn with_holdability(mut self, holdability: Holdability) -> Self {
        self.holdability = Some(holdability);
        self
    }

    pub fn without_monitoring(mut self) -> Self {
        self.disable_monitoring = true;
        self
    }

    /// Build the driver-level request these options describe.
    pub fn to_spec(&self) -> PrepareSpec {
        let result_set_type = self.result_set_type.unwrap_or(if self.scrollable {
            ResultSetType::ScrollInsensitive
        } else {
            ResultSetType::ForwardOnly
        });
        let concurrency = self.concurrency.unwrap_or(if self.updatable {
            Concurrency::Updatable
        } else {
            Concurrency::ReadOnly
        });
        let generated_keys = match &self.auto_generated_key_columns {
            Some(columns) => GeneratedKeys::ColumnNames(columns.clone()),
            None if self.return_generated_keys => GeneratedKeys::Auto,
            None => GeneratedKeys::None,
        };
        PrepareSpec {
            result_set_type,
            concurrency,
            holdability: self.holdability,
            generated_keys,
        }
    }
}

/// What the raw connection is asked for when creating a statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrepareSpec {
    pub result_set_type: ResultSetType,
    pub concurrency: Concurrency,
    pub holdability: Option<Holdability>,
    pub generated_keys: GeneratedKeys,
}

impl PrepareSpec {
    /// The simplest request every driver understands.
    pub fn plain() -> Self {
        Self::default()
    }

    pub fn is_plain(&self) -> bool {
        *self == Self::plain()
    }

    /// Same request with generated keys dropped.
    pub fn without_keys(&self) -> Self {
        Self {
            generated_keys: GeneratedKeys::None,
            ..self.clone()
        }
    }
}
