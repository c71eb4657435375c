//! Database metadata facade.
//!
//! Lookups that return rows are handed out as synthetic result fetchers so
//! they show up in monitors like any other result.

use super::context::ContextInner;
use super::fetcher::ResultFetcher;
use crate::driver::{ObjectFilter, RawCursor, RawMetadata};
use crate::error::{DriverResult, ExecResult};
use serde::Serialize;
use std::sync::Arc;

/// Product and driver identification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductInfo {
    pub product_name: String,
    pub product_version: String,
    pub driver_name: String,
    pub driver_version: String,
}

pub struct DatabaseMetadata {
    ctx: Arc<ContextInner>,
    raw: Box<dyn RawMetadata>,
}

impl DatabaseMetadata {
    pub(crate) fn new(ctx: Arc<ContextInner>, raw: Box<dyn RawMetadata>) -> Self {
        Self { ctx, raw }
    }

    pub fn product_info(&self) -> ExecResult<ProductInfo> {
        Ok(ProductInfo {
            product_name: self.raw.product_name()?,
            product_version: self.raw.product_version()?,
            driver_name: self.raw.driver_name()?,
            driver_version: self.raw.driver_version()?,
        })
    }

    pub fn user_name(&self) -> ExecResult<Option<String>> {
        Ok(self.raw.user_name()?)
    }

    fn wrap(&self, cursor: DriverResult<Box<dyn RawCursor>>, description: &str) -> ExecResult<ResultFetcher> {
        self.ctx.ensure_open()?;
        Ok(ResultFetcher::synthetic(Arc::clone(&self.ctx), cursor?, description))
    }

    pub fn catalogs(&self) -> ExecResult<ResultFetcher> {
        self.wrap(self.raw.catalogs(), "Load catalogs")
    }

    pub fn schemas(&self) -> ExecResult<ResultFetcher> {
        self.wrap(self.raw.schemas(), "Load schemas")
    }

    /// Tables matching `filter`; an empty `types` slice means every type.
    pub fn tables(&self, filter: &ObjectFilter, types: &[&str]) -> ExecResult<ResultFetcher> {
        self.wrap(self.raw.tables(filter, types), &describe("Load tables", filter))
    }

    pub fn columns(&self, filter: &ObjectFilter, column_pattern: Option<&str>) -> ExecResult<ResultFetcher> {
        self.wrap(
            self.raw.columns(filter, column_pattern),
            &describe("Load columns", filter),
        )
    }

    pub fn primary_keys(&self, filter: &ObjectFilter) -> ExecResult<ResultFetcher> {
        self.wrap(
            self.raw.primary_keys(filter),
            &describe("Load primary keys", filter),
        )
    }
}

fn describe(what: &str, filter: &ObjectFilter) -> String {
    let scope: Vec<&str> = [&filter.catalog, &filter.schema, &filter.name]
        .into_iter()
        .filter_map(|part| part.as_deref())
        .collect();
    if scope.is_empty() {
        what.to_string()
    } else {
        format!("{what} of {}", scope.join("."))
    }
}
