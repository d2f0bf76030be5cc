//! Predicate tree for `$filter` expressions
//!
//! `Filter` is the structured form of a boolean query over entity
//! properties. Build it with the typed constructors (`Filter::eq`,
//! `Filter::contains`, `Filter::any`, ...), combine with `and`/`or`/`!`, and
//! fall back to `Filter::raw` for anything the builder does not cover.

use std::fmt;
use std::sync::Arc;

pub use super::literal::FilterValue;

/// Binary operators understood by the compiler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    And,
    Or,
}

impl BinaryOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOperator::Eq => "eq",
            BinaryOperator::Ne => "ne",
            BinaryOperator::Gt => "gt",
            BinaryOperator::Ge => "ge",
            BinaryOperator::Lt => "lt",
            BinaryOperator::Le => "le",
            BinaryOperator::And => "and",
            BinaryOperator::Or => "or",
        }
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOperator::And | BinaryOperator::Or)
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// Where a member path starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathRoot {
    /// The entity being queried
    Entity,
    /// A lambda variable bound by an enclosing `any`/`all`
    Variable(String),
}

/// A property path such as `Address/City`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberPath {
    pub root: PathRoot,
    pub segments: Vec<String>,
}

impl MemberPath {
    /// Path on the queried entity; `/` separates navigation segments
    pub fn entity(path: &str) -> Self {
        Self {
            root: PathRoot::Entity,
            segments: split_path(path),
        }
    }

    /// Path on a lambda variable; an empty path refers to the variable itself
    pub fn variable(name: impl Into<String>, path: &str) -> Self {
        Self {
            root: PathRoot::Variable(name.into()),
            segments: split_path(path),
        }
    }
}

fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// `any` or `all`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantifierKind {
    Any,
    All,
}

impl QuantifierKind {
    pub fn name(&self) -> &'static str {
        match self {
            QuantifierKind::Any => "any",
            QuantifierKind::All => "all",
        }
    }
}

/// A value computed from outside the query, evaluated once at compile time
#[derive(Clone)]
pub struct Captured(Arc<dyn Fn() -> FilterValue + Send + Sync>);

impl Captured {
    pub fn evaluate(&self) -> FilterValue {
        (self.0)()
    }
}

impl fmt::Debug for Captured {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Captured(..)")
    }
}

/// A node of the predicate tree
#[derive(Debug, Clone)]
pub enum Filter {
    Binary {
        op: BinaryOperator,
        left: Box<Filter>,
        right: Box<Filter>,
    },
    Not(Box<Filter>),
    Member(MemberPath),
    Literal(FilterValue),
    /// Closure over a value outside the query
    Captured(Captured),
    /// `contains`, `startswith`, `tolower`, `in`, ...
    Method {
        name: String,
        target: Option<Box<Filter>>,
        args: Vec<Filter>,
    },
    Quantifier {
        kind: QuantifierKind,
        collection: MemberPath,
        variable: String,
        predicate: Option<Box<Filter>>,
    },
    /// Pre-rendered filter text, emitted verbatim
    Raw(String),
}

impl Filter {
    /// Reference a property of the queried entity
    pub fn field(path: &str) -> Self {
        Filter::Member(MemberPath::entity(path))
    }

    /// Reference a property of a lambda variable (`p/Name`)
    pub fn var(variable: &str, path: &str) -> Self {
        Filter::Member(MemberPath::variable(variable, path))
    }

    pub fn value(value: impl Into<FilterValue>) -> Self {
        Filter::Literal(value.into())
    }

    /// Capture a value from the surrounding scope; it is evaluated exactly once when compiled
    pub fn captured<F>(f: F) -> Self
    where
        F: Fn() -> FilterValue + Send + Sync + 'static,
    {
        Filter::Captured(Captured(Arc::new(f)))
    }

    pub fn raw(expr: impl Into<String>) -> Self {
        Filter::Raw(expr.into())
    }

    pub fn binary(left: Filter, op: BinaryOperator, right: Filter) -> Self {
        Filter::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn compare(field: &str, op: BinaryOperator, value: impl Into<FilterValue>) -> Self {
        Self::binary(Filter::field(field), op, Filter::value(value))
    }

    pub fn eq(field: &str, value: impl Into<FilterValue>) -> Self {
        Self::compare(field, BinaryOperator::Eq, value)
    }

    pub fn ne(field: &str, value: impl Into<FilterValue>) -> Self {
        Self::compare(field, BinaryOperator::Ne, value)
    }

    pub fn gt(field: &str, value: impl Into<FilterValue>) -> Self {
        Self::compare(field, BinaryOperator::Gt, value)
    }

    pub fn ge(field: &str, value: impl Into<FilterValue>) -> Self {
        Self::compare(field, BinaryOperator::Ge, value)
    }

    pub fn lt(field: &str, value: impl Into<FilterValue>) -> Self {
        Self::compare(field, BinaryOperator::Lt, value)
    }

    pub fn le(field: &str, value: impl Into<FilterValue>) -> Self {
        Self::compare(field, BinaryOperator::Le, value)
    }

    pub fn is_null(field: &str) -> Self {
        Self::compare(field, BinaryOperator::Eq, FilterValue::Null)
    }

    pub fn is_not_null(field: &str) -> Self {
        Self::compare(field, BinaryOperator::Ne, FilterValue::Null)
    }

    /// Compare this node with another using `op`
    pub fn cmp(self, op: BinaryOperator, other: Filter) -> Self {
        Self::binary(self, op, other)
    }

    pub fn and(self, other: Filter) -> Self {
        Self::binary(self, BinaryOperator::And, other)
    }

    pub fn or(self, other: Filter) -> Self {
        Self::binary(self, BinaryOperator::Or, other)
    }

    /// Call a method with this node as receiver
    pub fn call(self, name: &str, args: Vec<Filter>) -> Self {
        Filter::Method {
            name: name.to_string(),
            target: Some(Box::new(self)),
            args,
        }
    }

    /// Call a free-standing method (`isNullOrEmpty(path)`)
    pub fn static_call(name: &str, args: Vec<Filter>) -> Self {
        Filter::Method {
            name: name.to_string(),
            target: None,
            args,
        }
    }

    pub fn contains(field: &str, value: impl Into<FilterValue>) -> Self {
        Filter::field(field).call("contains", vec![Filter::value(value)])
    }

    pub fn starts_with(field: &str, value: impl Into<FilterValue>) -> Self {
        Filter::field(field).call("startswith", vec![Filter::value(value)])
    }

    pub fn ends_with(field: &str, value: impl Into<FilterValue>) -> Self {
        Filter::field(field).call("endswith", vec![Filter::value(value)])
    }

    pub fn to_lower(self) -> Self {
        self.call("tolower", Vec::new())
    }

    pub fn to_upper(self) -> Self {
        self.call("toupper", Vec::new())
    }

    pub fn trim(self) -> Self {
        self.call("trim", Vec::new())
    }

    pub fn is_null_or_empty(target: Filter) -> Self {
        Filter::static_call("isNullOrEmpty", vec![target])
    }

    /// Membership test: `field in (v1,v2,...)`
    pub fn is_in<V: Into<FilterValue>>(field: &str, values: impl IntoIterator<Item = V>) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        Filter::Method {
            name: "in".to_string(),
            target: Some(Box::new(Filter::field(field))),
            args: vec![Filter::Literal(FilterValue::Collection(values))],
        }
    }

    /// `collection/any(variable: predicate)`
    pub fn any(collection: MemberPath, variable: &str, predicate: Filter) -> Self {
        Filter::Quantifier {
            kind: QuantifierKind::Any,
            collection,
            variable: variable.to_string(),
            predicate: Some(Box::new(predicate)),
        }
    }

    /// `collection/all(variable: predicate)`
    pub fn all(collection: MemberPath, variable: &str, predicate: Filter) -> Self {
        Filter::Quantifier {
            kind: QuantifierKind::All,
            collection,
            variable: variable.to_string(),
            predicate: Some(Box::new(predicate)),
        }
    }

    /// `collection/any()`: the collection is non-empty
    pub fn has_any(collection: MemberPath) -> Self {
        Filter::Quantifier {
            kind: QuantifierKind::Any,
            collection,
            variable: String::new(),
            predicate: None,
        }
    }

    /// Short name of the node kind, used in error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Filter::Binary { .. } => "binary",
            Filter::Not(_) => "not",
            Filter::Member(_) => "member",
            Filter::Literal(_) => "literal",
            Filter::Captured(_) => "captured",
            Filter::Method { .. } => "method",
            Filter::Quantifier { .. } => "quantifier",
            Filter::Raw(_) => "raw",
        }
    }
}

impl std::ops::Not for Filter {
    type Output = Filter;

    fn not(self) -> Self::Output {
        Filter::Not(Box::new(self))
    }
}

impl From<&str> for Filter {
    fn from(raw: &str) -> Self {
        Filter::Raw(raw.to_string())
    }
}

impl From<String> for Filter {
    fn from(raw: String) -> Self {
        Filter::Raw(raw)
    }
}
