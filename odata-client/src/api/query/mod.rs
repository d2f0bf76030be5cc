//! OData Query Builder Module
//!
//! Turns structured query intent into OData URI syntax. `QueryBuilder` is the
//! fluent front end; `Query` is the compiled, reusable descriptor whose
//! `to_url` renders the relative request URL.

pub mod builder;
pub mod compiler;
pub mod expand;
pub mod filters;
pub mod function;
pub mod literal;
pub mod orderby;
pub mod query;
pub mod result;

pub use builder::QueryBuilder;
pub use compiler::compile;
pub use expand::Expand;
pub use filters::{BinaryOperator, Filter, FilterValue, MemberPath, PathRoot, QuantifierKind};
pub use function::{FunctionCall, FunctionParams};
pub use literal::{EntityKey, format_literal};
pub use orderby::OrderBy;
pub use query::Query;
pub use result::{QueryResponse, QueryResult};
