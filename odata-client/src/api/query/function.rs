//! Bound/unbound function calls in the resource path

use super::literal::{FilterValue, format_array_element, format_literal};

/// Ordered function parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionParams {
    params: Vec<(String, FilterValue)>,
}

impl FunctionParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter; the name is lower-camel-cased when rendered
    pub fn param(mut self, name: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Render as `name1=v1,name2=v2`
    pub fn render(&self) -> String {
        self.params
            .iter()
            .map(|(name, value)| format!("{}={}", lower_camel_case(name), format_param(value)))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl<K: Into<String>, V: Into<FilterValue>> FromIterator<(K, V)> for FunctionParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            params: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// A function segment such as `GetTopProducts(count=5)`
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub params: FunctionParams,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, params: FunctionParams) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    pub fn render(&self) -> String {
        format!("{}({})", self.name, self.params.render())
    }
}

fn format_param(value: &FilterValue) -> String {
    match value {
        // Array elements are written without per-element quoting
        FilterValue::Collection(items) => {
            let items: Vec<String> = items.iter().map(format_array_element).collect();
            format!("[{}]", items.join(","))
        }
        other => format_literal(other),
    }
}

/// `MaxPrice` -> `maxPrice`, `max_price` -> `maxPrice`
pub fn lower_camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for ch in name.chars() {
        if ch == '_' || ch == '-' {
            upper_next = !out.is_empty();
            continue;
        }
        if out.is_empty() {
            out.extend(ch.to_lowercase());
        } else if upper_next {
            out.extend(ch.to_uppercase());
        } else {
            out.push(ch);
        }
        upper_next = false;
    }
    out
}
