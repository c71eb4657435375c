//! Stored procedure calls.

use super::fetcher::ResultFetcher;
use super::prepared::PreparedStatement;
use crate::driver::RowsCursor;
use crate::error::ExecResult;
use crate::models::{ColumnMeta, ParamIndex, Parameter, Value};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Prepared procedure call with named parameters and out parameters.
#[derive(Debug)]
pub struct CallableStatement {
    prepared: PreparedStatement,
    /// Registered out parameters with their native type codes, in
    /// registration order.
    outputs: Vec<(ParamIndex, i32)>,
}

impl CallableStatement {
    pub(crate) fn new(prepared: PreparedStatement) -> Self {
        Self {
            prepared,
            outputs: Vec::new(),
        }
    }

    pub fn set_named_parameter(&mut self, name: &str, value: impl Into<Parameter>) -> ExecResult<()> {
        self.prepared.bind(ParamIndex::Name(name.to_string()), value.into())
    }

    fn register(&mut self, index: ParamIndex, sql_type: i32) -> ExecResult<()> {
        self.prepared.raw_mut()?.register_out_parameter(&index, sql_type)?;
        match self.outputs.iter_mut().find(|(i, _)| *i == index) {
            Some(entry) => entry.1 = sql_type,
            None => self.outputs.push((index, sql_type)),
        }
        Ok(())
    }

    /// Register the 1-based parameter `index` as an output of native type `sql_type`.
    pub fn register_out_parameter(&mut self, index: usize, sql_type: i32) -> ExecResult<()> {
        self.register(ParamIndex::Position(index), sql_type)
    }

    pub fn register_named_out_parameter(&mut self, name: &str, sql_type: i32) -> ExecResult<()> {
        self.register(ParamIndex::Name(name.to_string()), sql_type)
    }

    /// Value of an out parameter after execution.
    pub fn out_parameter(&self, index: usize) -> ExecResult<Value> {
        Ok(self.prepared.raw().out_parameter(&ParamIndex::Position(index))?)
    }

    pub fn named_out_parameter(&self, name: &str) -> ExecResult<Value> {
        Ok(self
            .prepared
            .raw()
            .out_parameter(&ParamIndex::Name(name.to_string()))?)
    }

    /// Every registered out parameter as a one-row result. Columns are named
    /// after the parameter (`#2`, `:total`).
    pub fn out_parameters(&self) -> ExecResult<ResultFetcher> {
        let mut columns = Vec::with_capacity(self.outputs.len());
        let mut row = Vec::with_capacity(self.outputs.len());
        for (index, sql_type) in &self.outputs {
            columns.push(ColumnMeta::new(index.to_string(), sql_type.to_string()));
            row.push(self.prepared.raw().out_parameter(index)?);
        }
        let cursor = RowsCursor::new(columns, vec![row]);
        let description = format!("Out parameters of {}", self.prepared.query().unwrap_or("call"));
        Ok(ResultFetcher::synthetic(
            Arc::clone(self.prepared.context()),
            Box::new(cursor),
            &description,
        ))
    }
}

impl Deref for CallableStatement {
    type Target = PreparedStatement;

    fn deref(&self) -> &Self::Target {
        &self.prepared
    }
}

impl DerefMut for CallableStatement {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.prepared
    }
}
