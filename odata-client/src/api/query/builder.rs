//! Fluent query builder

use std::collections::BTreeMap;

use super::compiler::compile;
use super::expand::Expand;
use super::filters::Filter;
use super::function::{FunctionCall, FunctionParams};
use super::literal::EntityKey;
use super::orderby::OrderBy;
use super::query::Query;
use crate::api::error::Result;

/// Fluent builder that accumulates query options and compiles them into a [`Query`]
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    entity_set: String,
    derived_type: Option<String>,
    key: Option<EntityKey>,
    function: Option<FunctionCall>,
    filters: Vec<Filter>,
    search: Option<String>,
    select: Vec<String>,
    expand: Vec<Expand>,
    order_by: Vec<OrderBy>,
    skip: Option<u64>,
    top: Option<u64>,
    count: bool,
    apply: Option<String>,
    compute: Vec<String>,
    headers: BTreeMap<String, String>,
}

impl QueryBuilder {
    pub fn new(entity_set: impl Into<String>) -> Self {
        Self {
            entity_set: entity_set.into(),
            derived_type: None,
            key: None,
            function: None,
            filters: Vec::new(),
            search: None,
            select: Vec::new(),
            expand: Vec::new(),
            order_by: Vec::new(),
            skip: None,
            top: None,
            count: false,
            apply: None,
            compute: Vec::new(),
            headers: BTreeMap::new(),
        }
    }

    /// Address a single entity by key
    pub fn key(mut self, key: impl Into<EntityKey>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Cast the set to a derived type
    pub fn cast(mut self, derived_type: impl Into<String>) -> Self {
        self.derived_type = Some(derived_type.into());
        self
    }

    /// Add a filter clause. Multiple clauses are AND-combined.
    pub fn filter(mut self, filter: impl Into<Filter>) -> Self {
        self.filters.push(filter.into());
        self
    }

    /// Add a pre-rendered filter clause
    pub fn filter_raw(self, filter: &str) -> Self {
        self.filter(Filter::raw(filter))
    }

    pub fn search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    pub fn select(mut self, fields: &[&str]) -> Self {
        self.select.extend(fields.iter().map(|f| f.to_string()));
        self
    }

    pub fn expand(mut self, expand: impl Into<Expand>) -> Self {
        self.expand.push(expand.into());
        self
    }

    pub fn order_by(mut self, order: impl Into<OrderBy>) -> Self {
        self.order_by.push(order.into());
        self
    }

    pub fn order_by_desc(self, field: &str) -> Self {
        self.order_by(OrderBy::desc(field))
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn top(mut self, top: u64) -> Self {
        self.top = Some(top);
        self
    }

    /// Request `$count=true`
    pub fn count(mut self) -> Self {
        self.count = true;
        self
    }

    /// Call a function on the addressed resource
    pub fn function(mut self, name: impl Into<String>, params: FunctionParams) -> Self {
        self.function = Some(FunctionCall::new(name, params));
        self
    }

    /// Raw `$apply` transformation text
    pub fn apply(mut self, apply: impl Into<String>) -> Self {
        self.apply = Some(apply.into());
        self
    }

    /// Add a `$compute` expression
    pub fn compute(mut self, expr: impl Into<String>) -> Self {
        self.compute.push(expr.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Compile every predicate and produce the reusable [`Query`]
    pub fn build(self) -> Result<Query> {
        let filters = self
            .filters
            .iter()
            .map(compile)
            .collect::<Result<Vec<_>>>()?;
        let expand = self
            .expand
            .iter()
            .map(Expand::render)
            .collect::<Result<Vec<_>>>()?;

        Ok(Query {
            entity_set: self.entity_set,
            derived_type: self.derived_type,
            key: self.key,
            function: self.function,
            filters,
            search: self.search,
            select: self.select,
            expand,
            order_by: self.order_by,
            skip: self.skip,
            top: self.top,
            count: self.count,
            apply: self.apply,
            compute: self.compute,
            headers: self.headers,
        })
    }

    /// Shortcut for `build()?.to_url()`
    pub fn build_url(&self) -> Result<String> {
        Ok(self.clone().build()?.to_url())
    }
}
