//! OData literal formatting
//!
//! Renders typed values into the literal syntax used inside `$filter`,
//! key segments and function parameter lists.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::error::{ODataError, Result};

/// A typed value that can be written as an OData literal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum FilterValue {
    Null,
    String(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Always rendered in UTC
    DateTime(DateTime<Utc>),
    Guid(Uuid),
    /// Enum member, rendered as its quoted member name
    Enum(String),
    Collection(Vec<FilterValue>),
}

const DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

impl FilterValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FilterValue::Null)
    }

    /// Build an enum literal from a member name
    pub fn enum_member(name: impl Into<String>) -> Self {
        FilterValue::Enum(name.into())
    }

    /// Convert a JSON value into a filter value (used for captured values and CLI input)
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => FilterValue::Null,
            serde_json::Value::Bool(b) => FilterValue::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    FilterValue::Int(i)
                } else {
                    FilterValue::Float(n.as_f64().unwrap_or_default())
                }
            }
            serde_json::Value::String(s) => {
                if let Ok(guid) = Uuid::parse_str(s) {
                    FilterValue::Guid(guid)
                } else {
                    FilterValue::String(s.clone())
                }
            }
            serde_json::Value::Array(items) => {
                FilterValue::Collection(items.iter().map(FilterValue::from_json).collect())
            }
            serde_json::Value::Object(_) => FilterValue::String(json.to_string()),
        }
    }
}

/// Render a value in OData literal syntax.
///
/// Strings are single-quoted with embedded quotes doubled, date/times are
/// written in UTC with second precision, GUIDs are bare, and numbers use
/// invariant decimal text. Collections render as a parenthesized list.
pub fn format_literal(value: &FilterValue) -> String {
    match value {
        FilterValue::Null => "null".to_string(),
        FilterValue::String(s) => quote(s),
        FilterValue::Bool(b) => b.to_string(),
        FilterValue::Int(i) => i.to_string(),
        FilterValue::Float(f) => format_float(*f),
        FilterValue::DateTime(dt) => dt.format(DATE_TIME_FORMAT).to_string(),
        FilterValue::Guid(g) => g.to_string(),
        FilterValue::Enum(member) => quote(member),
        FilterValue::Collection(items) => {
            let rendered: Vec<String> = items.iter().map(format_literal).collect();
            format!("({})", rendered.join(","))
        }
    }
}

/// Render a value as an element of a function-parameter array.
///
/// Strings inside function arrays are emitted unquoted.
pub fn format_array_element(value: &FilterValue) -> String {
    match value {
        FilterValue::String(s) => s.clone(),
        FilterValue::Enum(member) => member.clone(),
        other => format_literal(other),
    }
}

/// Single-quote a string, doubling any embedded quote
pub fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn format_float(f: f64) -> String {
    if f.is_finite() {
        f.to_string()
    } else if f.is_nan() {
        "NaN".to_string()
    } else if f > 0.0 {
        "INF".to_string()
    } else {
        "-INF".to_string()
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::String(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::String(value)
    }
}

impl From<&String> for FilterValue {
    fn from(value: &String) -> Self {
        FilterValue::String(value.clone())
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Bool(value)
    }
}

impl From<i32> for FilterValue {
    fn from(value: i32) -> Self {
        FilterValue::Int(value as i64)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Int(value)
    }
}

impl From<u32> for FilterValue {
    fn from(value: u32) -> Self {
        FilterValue::Int(value as i64)
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        FilterValue::Float(value)
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(value: DateTime<Utc>) -> Self {
        FilterValue::DateTime(value)
    }
}

impl From<NaiveDate> for FilterValue {
    fn from(value: NaiveDate) -> Self {
        FilterValue::DateTime(value.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc())
    }
}

impl From<Uuid> for FilterValue {
    fn from(value: Uuid) -> Self {
        FilterValue::Guid(value)
    }
}

impl<T: Into<FilterValue>> From<Option<T>> for FilterValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(FilterValue::Null)
    }
}

impl<T: Into<FilterValue>> From<Vec<T>> for FilterValue {
    fn from(values: Vec<T>) -> Self {
        FilterValue::Collection(values.into_iter().map(Into::into).collect())
    }
}

/// Key of a single entity, rendered inside the parentheses of `EntitySet(...)`
#[derive(Debug, Clone, PartialEq)]
pub enum EntityKey {
    Single(FilterValue),
    /// Named key properties, rendered as `A=1,B='x'`
    Composite(Vec<(String, FilterValue)>),
}

impl EntityKey {
    /// Build a composite key from name/value pairs
    pub fn composite<K, V>(parts: impl IntoIterator<Item = (K, V)>) -> Result<Self>
    where
        K: Into<String>,
        V: Into<FilterValue>,
    {
        let parts: Vec<(String, FilterValue)> = parts
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        if parts.is_empty() {
            return Err(ODataError::InvalidKey("composite key has no parts".into()));
        }
        for (name, value) in &parts {
            check_key_value(value).map_err(|e| match e {
                ODataError::InvalidKey(msg) => ODataError::InvalidKey(format!("{}: {}", name, msg)),
                other => other,
            })?;
        }
        Ok(EntityKey::Composite(parts))
    }

    /// Render the key segment without the surrounding parentheses
    pub fn render(&self) -> String {
        match self {
            EntityKey::Single(value) => format_key_value(value),
            EntityKey::Composite(parts) => parts
                .iter()
                .map(|(name, value)| format!("{}={}", name, format_key_value(value)))
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.render())
    }
}

fn check_key_value(value: &FilterValue) -> Result<()> {
    match value {
        FilterValue::Null => Err(ODataError::InvalidKey("key cannot be null".into())),
        FilterValue::Collection(_) => Err(ODataError::InvalidKey(
            "key cannot be a collection".into(),
        )),
        _ => Ok(()),
    }
}

fn format_key_value(value: &FilterValue) -> String {
    match value {
        FilterValue::Int(i) => i.to_string(),
        FilterValue::Guid(g) => g.to_string(),
        FilterValue::String(s) => quote(s),
        other => format_literal(other),
    }
}

impl TryFrom<FilterValue> for EntityKey {
    type Error = ODataError;

    fn try_from(value: FilterValue) -> Result<Self> {
        check_key_value(&value)?;
        Ok(EntityKey::Single(value))
    }
}

macro_rules! key_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for EntityKey {
                fn from(value: $ty) -> Self {
                    EntityKey::Single(value.into())
                }
            }
        )*
    };
}

key_from!(i32, i64, u32, &str, String, &String, Uuid);
