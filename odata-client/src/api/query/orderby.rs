//! `$orderby` clauses

use std::fmt;

/// A single sort key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }

    /// Parse `"Name"`, `"Name asc"` or `"Name desc"`
    pub fn parse(clause: &str) -> Self {
        let clause = clause.trim();
        match clause.rsplit_once(' ') {
            Some((field, dir)) if dir.eq_ignore_ascii_case("desc") => Self::desc(field.trim()),
            Some((field, dir)) if dir.eq_ignore_ascii_case("asc") => Self::asc(field.trim()),
            _ => Self::asc(clause),
        }
    }
}

impl fmt::Display for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.descending {
            write!(f, "{} desc", self.field)
        } else {
            write!(f, "{}", self.field)
        }
    }
}

impl From<&str> for OrderBy {
    fn from(clause: &str) -> Self {
        Self::parse(clause)
    }
}

/// Join sort keys into an `$orderby` value
pub fn render_order_by(clauses: &[OrderBy]) -> String {
    clauses
        .iter()
        .map(OrderBy::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
