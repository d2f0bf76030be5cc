//! `$expand` specifications with nested query options

use super::compiler::compile;
use super::filters::Filter;
use super::orderby::{OrderBy, render_order_by};
use crate::api::error::Result;

/// A navigation property to expand, optionally carrying its own query options
#[derive(Debug, Clone)]
pub struct Expand {
    pub navigation: String,
    pub select: Vec<String>,
    pub expand: Vec<Expand>,
    pub filters: Vec<Filter>,
    pub order_by: Vec<OrderBy>,
    pub top: Option<u64>,
    pub skip: Option<u64>,
}

impl Expand {
    pub fn new(navigation: impl Into<String>) -> Self {
        Self {
            navigation: navigation.into(),
            select: Vec::new(),
            expand: Vec::new(),
            filters: Vec::new(),
            order_by: Vec::new(),
            top: None,
            skip: None,
        }
    }

    pub fn select(mut self, fields: &[&str]) -> Self {
        self.select.extend(fields.iter().map(|f| f.to_string()));
        self
    }

    pub fn expand(mut self, nested: Expand) -> Self {
        self.expand.push(nested);
        self
    }

    pub fn filter(mut self, filter: impl Into<Filter>) -> Self {
        self.filters.push(filter.into());
        self
    }

    pub fn order_by(mut self, order: impl Into<OrderBy>) -> Self {
        self.order_by.push(order.into());
        self
    }

    pub fn top(mut self, top: u64) -> Self {
        self.top = Some(top);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Render as `Nav($select=..;$expand=..;$filter=..;$orderby=..;$top=..;$skip=..)`
    pub fn render(&self) -> Result<String> {
        let mut options = Vec::new();

        if !self.select.is_empty() {
            options.push(format!("$select={}", self.select.join(",")));
        }
        if !self.expand.is_empty() {
            let nested = self
                .expand
                .iter()
                .map(Expand::render)
                .collect::<Result<Vec<_>>>()?;
            options.push(format!("$expand={}", nested.join(",")));
        }
        if !self.filters.is_empty() {
            let clauses = self
                .filters
                .iter()
                .map(compile)
                .collect::<Result<Vec<_>>>()?;
            options.push(format!("$filter={}", combine_filters(&clauses)));
        }
        if !self.order_by.is_empty() {
            options.push(format!("$orderby={}", render_order_by(&self.order_by)));
        }
        if let Some(top) = self.top {
            options.push(format!("$top={}", top));
        }
        if let Some(skip) = self.skip {
            options.push(format!("$skip={}", skip));
        }

        if options.is_empty() {
            Ok(self.navigation.clone())
        } else {
            Ok(format!("{}({})", self.navigation, options.join(";")))
        }
    }
}

impl From<&str> for Expand {
    fn from(navigation: &str) -> Self {
        Expand::new(navigation)
    }
}

/// AND-combine filter clauses, each wrapped in parentheses
pub fn combine_filters(clauses: &[String]) -> String {
    clauses
        .iter()
        .map(|clause| format!("({})", clause))
        .collect::<Vec<_>>()
        .join(" and ")
}
