use super::MemoryDatabase;
use crate::driver::{ObjectFilter, RawCursor, RawMetadata, RowsCursor};
use crate::error::DriverResult;
use crate::models::Value;
use std::sync::Arc;

const CATALOG: &str = "memory";
const SCHEMA: &str = "main";

/// Metadata view over the committed tables of a memory database.
pub struct MemoryMetadata {
    db: Arc<MemoryDatabase>,
}

impl MemoryMetadata {
    pub fn new(db: Arc<MemoryDatabase>) -> Self {
        Self { db }
    }

    fn matches_scope(filter: &ObjectFilter) -> bool {
        filter.catalog.as_deref().is_none_or(|c| like(CATALOG, c))
            && filter.schema.as_deref().is_none_or(|s| like(SCHEMA, s))
    }

    fn matching_tables(&self, filter: &ObjectFilter) -> Vec<String> {
        if !Self::matches_scope(filter) {
            return Vec::new();
        }
        self.db
            .table_names()
            .into_iter()
            .filter(|t| filter.name.as_deref().is_none_or(|n| like(t, n)))
            .collect()
    }
}

/// SQL `LIKE` match, case-insensitive. `%` matches any run, `_` one character.
pub(crate) fn like(value: &str, pattern: &str) -> bool {
    fn go(v: &[char], p: &[char]) -> bool {
        match p.split_first() {
            None => v.is_empty(),
            Some(('%', rest)) => (0..=v.len()).any(|i| go(&v[i..], rest)),
            Some(('_', rest)) => !v.is_empty() && go(&v[1..], rest),
            Some((c, rest)) => v
                .first()
                .is_some_and(|x| x.eq_ignore_ascii_case(c))
                && go(&v[1..], rest),
        }
    }
    let v: Vec<char> = value.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    go(&v, &p)
}

impl RawMetadata for MemoryMetadata {
    fn product_name(&self) -> DriverResult<String> {
        Ok("MemoryDB".to_string())
    }

    fn product_version(&self) -> DriverResult<String> {
        Ok(env!("CARGO_PKG_VERSION").to_string())
    }

    fn driver_name(&self) -> DriverResult<String> {
        Ok("memory".to_string())
    }

    fn driver_version(&self) -> DriverResult<String> {
        Ok(env!("CARGO_PKG_VERSION").to_string())
    }

    fn catalogs(&self) -> DriverResult<Box<dyn RawCursor>> {
        Ok(Box::new(RowsCursor::from_names(
            &["TABLE_CAT"],
            vec![vec![Value::from(CATALOG)]],
        )))
    }

    fn schemas(&self) -> DriverResult<Box<dyn RawCursor>> {
        Ok(Box::new(RowsCursor::from_names(
            &["TABLE_SCHEM", "TABLE_CATALOG"],
            vec![vec![Value::from(SCHEMA), Value::from(CATALOG)]],
        )))
    }

    fn tables(&self, filter: &ObjectFilter, types: &[&str]) -> DriverResult<Box<dyn RawCursor>> {
        let wants_tables = types.is_empty() || types.iter().any(|t| t.eq_ignore_ascii_case("TABLE"));
        let rows = if wants_tables {
            self.matching_tables(filter)
                .into_iter()
                .map(|name| {
                    vec![
                        Value::from(CATALOG),
                        Value::from(SCHEMA),
                        Value::from(name),
                        Value::from("TABLE"),
                    ]
                })
                .collect()
        } else {
            Vec::new()
        };
        Ok(Box::new(RowsCursor::from_names(
            &["TABLE_CAT", "TABLE_SCHEM", "TABLE_NAME", "TABLE_TYPE"],
            rows,
        )))
    }

    fn columns(
        &self,
        filter: &ObjectFilter,
        column_pattern: Option<&str>,
    ) -> DriverResult<Box<dyn RawCursor>> {
        let mut rows = Vec::new();
        for name in self.matching_tables(filter) {
            let Some(table) = self.db.table(&name) else {
                continue;
            };
            for (ordinal, column) in table.columns.iter().enumerate() {
                if column_pattern.is_some_and(|p| !like(&column.name, p)) {
                    continue;
                }
                rows.push(vec![
                    Value::from(name.as_str()),
                    Value::from(column.name.as_str()),
                    Value::from(column.type_name.as_str()),
                    Value::from(column.nullable),
                    Value::Int(ordinal as i64 + 1),
                ]);
            }
        }
        Ok(Box::new(RowsCursor::from_names(
            &["TABLE_NAME", "COLUMN_NAME", "TYPE_NAME", "NULLABLE", "ORDINAL_POSITION"],
            rows,
        )))
    }

    fn primary_keys(&self, filter: &ObjectFilter) -> DriverResult<Box<dyn RawCursor>> {
        // The first column of every memory table acts as its key.
        let rows = self
            .matching_tables(filter)
            .into_iter()
            .filter_map(|name| {
                let table = self.db.table(&name)?;
                let first = table.columns.first()?;
                Some(vec![
                    Value::from(name.as_str()),
                    Value::from(first.name.as_str()),
                    Value::Int(1),
                ])
            })
            .collect();
        Ok(Box::new(RowsCursor::from_names(
            &["TABLE_NAME", "COLUMN_NAME", "KEY_SEQ"],
            rows,
        )))
    }
}
