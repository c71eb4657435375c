//! Identity of a managed statement as seen by monitors and result fetchers.

use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Which factory produced a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    Plain,
    Prepared,
    Callable,
    /// Fabricated to own a cursor that did not come from a query.
    Synthetic,
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Plain => "plain",
            Self::Prepared => "prepared",
            Self::Callable => "callable",
            Self::Synthetic => "synthetic",
        };
        f.write_str(s)
    }
}

/// Snapshot of a statement's identity and current texts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatementInfo {
    /// Sequence number, unique within the owning context
    pub id: u64,
    pub context_id: Uuid,
    pub kind: StatementKind,
    pub query: Option<String>,
    pub description: Option<String>,
    /// Free-form tag describing why the statement runs
    pub purpose: Option<String>,
}

impl StatementInfo {
    pub fn new(id: u64, context_id: Uuid, kind: StatementKind) -> Self {
        Self {
            id,
            context_id,
            kind,
            query: None,
            description: None,
            purpose: None,
        }
    }

    /// Description if set, otherwise the query text.
    pub fn label(&self) -> Option<&str> {
        self.description.as_deref().or(self.query.as_deref())
    }

    pub fn is_synthetic(&self) -> bool {
        self.kind == StatementKind::Synthetic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_prefers_description() {
        let mut info = StatementInfo::new(1, Uuid::nil(), StatementKind::Plain);
        assert_eq!(info.label(), None);
        info.query = Some("SELECT 1".to_string());
        assert_eq!(info.label(), Some("SELECT 1"));
        info.description = Some("Load users".to_string());
        assert_eq!(info.label(), Some("Load users"));
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(StatementKind::Synthetic).unwrap(),
            serde_json::json!("synthetic")
        );
        assert_eq!(StatementKind::Callable.to_string(), "callable");
    }
}
