//! Prepared statements with bound-parameter capture.

use super::fetcher::ResultFetcher;
use super::statement::ManagedStatement;
use crate::error::ExecResult;
use crate::models::{GeneratedKeys, ParamIndex, Parameter};
use std::collections::BTreeMap;
use std::io::Read;
use std::ops::{Deref, DerefMut};

/// Statement prepared once and executed with bound parameters.
///
/// Every bound value is remembered in display form so progress labels and
/// monitors can show the query with its parameters substituted.
#[derive(Debug)]
pub struct PreparedStatement {
    base: ManagedStatement,
    params: BTreeMap<ParamIndex, String>,
}

impl PreparedStatement {
    pub(crate) fn new(base: ManagedStatement) -> Self {
        Self {
            base,
            params: BTreeMap::new(),
        }
    }

    pub(crate) fn bind(&mut self, index: ParamIndex, param: Parameter) -> ExecResult<()> {
        let display = param.display_value();
        self.base.raw_mut()?.set_parameter(&index, param)?;
        self.params.insert(index, display);
        Ok(())
    }

    /// Bind the 1-based parameter `index`.
    pub fn set_parameter(&mut self, index: usize, value: impl Into<Parameter>) -> ExecResult<()> {
        self.bind(ParamIndex::Position(index), value.into())
    }

    pub fn set_null(&mut self, index: usize, sql_type: i32) -> ExecResult<()> {
        self.bind(ParamIndex::Position(index), Parameter::TypedNull { sql_type })
    }

    pub fn set_binary_stream(
        &mut self,
        index: usize,
        reader: impl Read + Send + 'static,
        length: Option<u64>,
    ) -> ExecResult<()> {
        self.bind(
            ParamIndex::Position(index),
            Parameter::BinaryStream {
                reader: Box::new(reader),
                length,
            },
        )
    }

    pub fn set_character_stream(
        &mut self,
        index: usize,
        reader: impl Read + Send + 'static,
        length: Option<u64>,
    ) -> ExecResult<()> {
        self.bind(
            ParamIndex::Position(index),
            Parameter::CharacterStream {
                reader: Box::new(reader),
                length,
            },
        )
    }

    pub fn clear_parameters(&mut self) -> ExecResult<()> {
        self.base.raw_mut()?.clear_parameters()?;
        self.params.clear();
        Ok(())
    }

    /// Display form of every bound parameter.
    pub fn bound_parameters(&self) -> &BTreeMap<ParamIndex, String> {
        &self.params
    }

    /// Query text with positional placeholders replaced by the bound values.
    pub fn formatted_query(&self) -> String {
        self.base
            .query()
            .map(|sql| format_query(sql, &self.params))
            .unwrap_or_default()
    }

    fn label(&self) -> Option<String> {
        match self.base.description() {
            Some(description) => Some(description.to_string()),
            None if self.params.is_empty() => None,
            None => Some(self.formatted_query()),
        }
    }

    /// Execute the prepared text with the current bindings.
    pub fn execute(&mut self) -> ExecResult<bool> {
        self.execute_with_keys(&GeneratedKeys::None)
    }

    pub fn execute_with_keys(&mut self, keys: &GeneratedKeys) -> ExecResult<bool> {
        let label = self.label();
        self.base.execute_raw(None, keys, label)
    }

    pub fn execute_query(&mut self) -> ExecResult<ResultFetcher> {
        let label = self.label();
        self.base.query_raw(None, label)
    }

    pub fn execute_update(&mut self) -> ExecResult<i64> {
        self.execute_update_with_keys(&GeneratedKeys::None)
    }

    pub fn execute_update_with_keys(&mut self, keys: &GeneratedKeys) -> ExecResult<i64> {
        let label = self.label();
        self.base.update_raw(None, keys, label)
    }

    /// Queue the current bindings as one batch entry.
    pub fn add_batch(&mut self) -> ExecResult<()> {
        Ok(self.base.raw_mut()?.add_batch(None)?)
    }

    pub fn execute_batch(&mut self) -> ExecResult<Vec<i64>> {
        let label = self.base.description().map(str::to_string);
        self.base.execute_batch_labelled(label)
    }
}

impl Deref for PreparedStatement {
    type Target = ManagedStatement;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl DerefMut for PreparedStatement {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.base
    }
}

/// Substitute `?` placeholders with bound display values. Quoted sections are
/// copied untouched; unbound placeholders stay as `?`.
pub(crate) fn format_query(sql: &str, params: &BTreeMap<ParamIndex, String>) -> String {
    let mut out = String::with_capacity(sql.len() * 2);
    let mut position = 0;
    let mut quote: Option<char> = None;
    let mut prev = '\0';
    for c in sql.chars() {
        if let Some(q) = quote {
            out.push(c);
            if c == q && prev != '\\' {
                quote = None;
            }
            prev = c;
            continue;
        }
        match c {
            '?' => {
                position += 1;
                match params.get(&ParamIndex::Position(position)) {
                    Some(value) => out.push_str(value),
                    None => out.push(c),
                }
            }
            '\'' | '"' => {
                quote = Some(c);
                out.push(c);
            }
            _ => out.push(c),
        }
        prev = c;
    }
    out
}
