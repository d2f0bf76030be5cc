//! Reusable, fully rendered query descriptor

use std::collections::BTreeMap;

use super::expand::combine_filters;
use super::function::FunctionCall;
use super::literal::EntityKey;
use super::orderby::{OrderBy, render_order_by};

/// A compiled OData query.
///
/// Produced by [`QueryBuilder::build`](super::QueryBuilder::build); every
/// predicate has already been translated, so rendering the URL cannot fail.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub entity_set: String,
    /// Derived-type cast segment, e.g. `NS.Employee`
    pub derived_type: Option<String>,
    pub key: Option<EntityKey>,
    pub function: Option<FunctionCall>,
    /// Compiled filter clauses, AND-combined when rendered
    pub filters: Vec<String>,
    pub search: Option<String>,
    pub select: Vec<String>,
    /// Rendered expand specs
    pub expand: Vec<String>,
    pub order_by: Vec<OrderBy>,
    pub skip: Option<u64>,
    pub top: Option<u64>,
    pub count: bool,
    pub apply: Option<String>,
    pub compute: Vec<String>,
    /// Extra headers sent with the request (not part of the URL)
    pub headers: BTreeMap<String, String>,
}

impl Query {
    pub fn new(entity_set: impl Into<String>) -> Self {
        Self {
            entity_set: entity_set.into(),
            ..Default::default()
        }
    }

    /// Resource path without query options
    pub fn path(&self) -> String {
        let mut path = self.entity_set.clone();
        if let Some(derived) = &self.derived_type {
            path.push('/');
            path.push_str(derived);
        }
        if let Some(key) = &self.key {
            path.push_str(&format!("({})", key.render()));
        }
        if let Some(function) = &self.function {
            path.push('/');
            path.push_str(&function.render());
        }
        path
    }

    /// Query options in wire order:
    /// filter, search, select, expand, orderby, skip, top, count, apply, compute
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();

        if !self.filters.is_empty() {
            params.push(("$filter", encode(&combine_filters(&self.filters))));
        }
        if let Some(search) = self.search.as_deref().filter(|s| !s.is_empty()) {
            params.push(("$search", encode(search)));
        }
        if !self.select.is_empty() {
            params.push(("$select", self.select.join(",")));
        }
        if !self.expand.is_empty() {
            params.push(("$expand", self.expand.join(",")));
        }
        if !self.order_by.is_empty() {
            params.push(("$orderby", render_order_by(&self.order_by)));
        }
        if let Some(skip) = self.skip {
            params.push(("$skip", skip.to_string()));
        }
        if let Some(top) = self.top {
            params.push(("$top", top.to_string()));
        }
        if self.count {
            params.push(("$count", "true".to_string()));
        }
        if let Some(apply) = self.apply.as_deref().filter(|s| !s.is_empty()) {
            params.push(("$apply", encode(apply)));
        }
        if !self.compute.is_empty() {
            params.push(("$compute", encode(&self.compute.join(","))));
        }

        params
    }

    /// Relative URL: `{EntitySet}[/{DerivedType}][({Key})][/{Function}(params)][?options]`
    pub fn to_url(&self) -> String {
        let path = self.path();
        let params = self.query_params();
        if params.is_empty() {
            return path;
        }
        let query = params
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{}", path, query)
    }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_url())
    }
}

fn encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}
