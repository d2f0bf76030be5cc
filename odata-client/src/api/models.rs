//! Shared data models

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::ops::{Deref, DerefMut};

/// An entity of an open type: declared properties in `T`, anything else the
/// server sends kept in `extra`.
///
/// `T` must not use `deny_unknown_fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenEntity<T> {
    #[serde(flatten)]
    pub entity: T,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl<T> OpenEntity<T> {
    pub fn new(entity: T) -> Self {
        Self {
            entity,
            extra: Map::new(),
        }
    }

    /// Dynamic property by name
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.extra.get(name)
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.extra.insert(name.into(), value.into());
    }

    /// Instance annotations such as `@odata.etag`
    pub fn annotations(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.extra.iter().filter(|(name, _)| name.contains('@'))
    }

    /// `@odata.etag`, if the server sent one
    pub fn etag(&self) -> Option<&str> {
        self.extra.get("@odata.etag").and_then(Value::as_str)
    }

    pub fn into_inner(self) -> T {
        self.entity
    }
}

impl<T> Deref for OpenEntity<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.entity
    }
}

impl<T> DerefMut for OpenEntity<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.entity
    }
}
