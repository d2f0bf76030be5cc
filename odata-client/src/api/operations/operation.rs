//! Core Operation types for OData requests that can run alone or inside a batch

use log::warn;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tokio_util::sync::CancellationToken;

use crate::api::error::ODataError;
use crate::api::query::EntityKey;

/// The kind of request an operation performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Get,
    Create,
    Update,
    Delete,
}

impl OperationKind {
    /// Get the HTTP method for this kind
    pub fn http_method(&self) -> Method {
        match self {
            Self::Get => Method::GET,
            Self::Create => Method::POST,
            Self::Update => Method::PATCH,
            Self::Delete => Method::DELETE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Create and Update carry a JSON body
    pub fn has_body(&self) -> bool {
        matches!(self, Self::Create | Self::Update)
    }

    /// Update and Delete honour `If-Match`
    pub fn uses_etag(&self) -> bool {
        matches!(self, Self::Update | Self::Delete)
    }
}

/// Declares what a successful response body should deserialize into.
///
/// The decoder keeps the JSON value only if it deserializes as the declared
/// type; [`OperationResult::deserialize`] then yields the typed value.
#[derive(Clone, Copy)]
pub struct ResultType {
    name: &'static str,
    check: fn(&Value) -> serde_json::Result<()>,
}

fn check_as<T: DeserializeOwned>(value: &Value) -> serde_json::Result<()> {
    T::deserialize(value).map(|_| ())
}

impl ResultType {
    pub fn of<T: DeserializeOwned>() -> Self {
        Self {
            name: std::any::type_name::<T>(),
            check: check_as::<T>,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Parse a body and validate it against the declared type
    pub fn deserialize(&self, body: &str) -> serde_json::Result<Value> {
        let value: Value = serde_json::from_str(body)?;
        (self.check)(&value)?;
        Ok(value)
    }

    /// Validate an already-parsed JSON value
    pub fn validate(&self, value: Value) -> serde_json::Result<Value> {
        (self.check)(&value)?;
        Ok(value)
    }
}

impl fmt::Debug for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResultType({})", self.name)
    }
}

/// A single request that can be executed individually or in a batch
#[derive(Debug, Clone)]
pub struct Operation {
    /// Unique within a batch; sent as `Content-ID`
    pub id: String,
    pub kind: OperationKind,
    /// URL relative to the service root
    pub url: String,
    pub body: Option<Value>,
    /// Sent as `If-Match` on Update/Delete
    pub etag: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub result_type: Option<ResultType>,
}

/// Short random token used as the default operation id
pub fn short_id() -> String {
    format!("{:08x}", rand::random::<u32>())
}

impl Operation {
    pub fn new(kind: OperationKind, url: impl Into<String>) -> Self {
        Self {
            id: short_id(),
            kind,
            url: url.into(),
            body: None,
            etag: None,
            headers: BTreeMap::new(),
            result_type: None,
        }
    }

    /// Create a new Get operation for any relative URL (e.g. a rendered query)
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(OperationKind::Get, url)
    }

    /// Create a new Create operation (POST to the entity set)
    pub fn create(entity_set: impl Into<String>, data: Value) -> Self {
        Self::new(OperationKind::Create, entity_set).with_body(data)
    }

    /// Create a new Update operation (PATCH `EntitySet(key)`)
    pub fn update(entity_set: &str, key: impl Into<EntityKey>, data: Value) -> Self {
        Self::new(OperationKind::Update, entity_url(entity_set, &key.into())).with_body(data)
    }

    /// Create a new Delete operation
    pub fn delete(entity_set: &str, key: impl Into<EntityKey>) -> Self {
        Self::new(OperationKind::Delete, entity_url(entity_set, &key.into()))
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Declare the type a successful response deserializes into
    pub fn expecting<T: DeserializeOwned>(mut self) -> Self {
        self.result_type = Some(ResultType::of::<T>());
        self
    }

    /// Get the HTTP method for this operation
    pub fn http_method(&self) -> Method {
        self.kind.http_method()
    }

    /// Get the operation type as a string
    pub fn operation_type(&self) -> &'static str {
        self.kind.as_str()
    }

    /// The `If-Match` value this operation sends, if any
    pub fn if_match(&self) -> Option<&str> {
        if self.kind.uses_etag() {
            self.etag.as_deref()
        } else {
            None
        }
    }

    /// Execute this operation individually against a client
    pub async fn execute(
        &self,
        client: &crate::api::ODataClient,
        cancel: &CancellationToken,
    ) -> crate::api::error::Result<OperationResult> {
        client.execute(self, cancel).await
    }
}

fn entity_url(entity_set: &str, key: &EntityKey) -> String {
    format!("{}({})", entity_set, key.render())
}

/// Result of executing an Operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    /// Id of the operation this result belongs to
    pub operation_id: String,
    /// Whether the status code was 2xx
    pub success: bool,
    pub status_code: u16,
    /// Raw response body
    pub body: String,
    /// Body deserialized as the declared result type, if any
    pub data: Option<Value>,
    /// Error message if operation failed
    pub error: Option<String>,
    /// Response headers that might be useful (e.g., ETag, OData-EntityId)
    pub headers: HashMap<String, String>,
    /// Set when the server answered 412 Precondition Failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict: Option<EtagConflict>,
}

/// ETags involved in a rejected conditional request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtagConflict {
    /// `If-Match` value the request carried
    pub expected_etag: Option<String>,
    /// `ETag` the server reported with the 412
    pub current_etag: Option<String>,
}

impl From<EtagConflict> for ODataError {
    fn from(conflict: EtagConflict) -> Self {
        ODataError::ConcurrencyConflict {
            expected_etag: conflict.expected_etag,
            current_etag: conflict.current_etag,
        }
    }
}

impl OperationResult {
    /// Build a result from a status line, headers and body.
    ///
    /// On 2xx with a declared result type the body is deserialized; a body
    /// that does not fit is logged and leaves `data` empty.
    pub fn from_response(
        operation_id: impl Into<String>,
        status_code: u16,
        headers: HashMap<String, String>,
        body: String,
        result_type: Option<&ResultType>,
    ) -> Self {
        let operation_id = operation_id.into();
        let success = (200..300).contains(&status_code);
        let mut data = None;
        let mut error = None;

        if success {
            if let Some(result_type) = result_type.filter(|_| !body.trim().is_empty()) {
                match result_type.deserialize(&body) {
                    Ok(value) => data = Some(value),
                    Err(e) => warn!(
                        "Operation {}: could not deserialize body as {}: {}",
                        operation_id,
                        result_type.name(),
                        e
                    ),
                }
            }
        } else {
            error = Some(body.clone());
        }

        Self {
            operation_id,
            success,
            status_code,
            body,
            data,
            error,
            headers,
            conflict: None,
        }
    }

    /// Result for `operation` built from its response. A 412 is recorded as
    /// an [`EtagConflict`] carrying both ETags.
    pub fn for_operation(
        operation: &Operation,
        status_code: u16,
        headers: HashMap<String, String>,
        body: String,
    ) -> Self {
        let mut result = Self::from_response(
            operation.id.clone(),
            status_code,
            headers,
            body,
            operation.result_type.as_ref(),
        );
        if status_code == 412 {
            result.conflict = Some(EtagConflict {
                expected_etag: operation.if_match().map(str::to_string),
                current_etag: result.etag().map(str::to_string),
            });
        }
        result
    }

    /// Whether the server rejected this operation's `If-Match`
    pub fn is_conflict(&self) -> bool {
        self.conflict.is_some()
    }

    /// The conflict as an [`ODataError::ConcurrencyConflict`]
    pub fn conflict_error(&self) -> Option<ODataError> {
        self.conflict.clone().map(ODataError::from)
    }

    /// Check if this result represents a successful operation
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Check if this result represents a failed operation
    pub fn is_error(&self) -> bool {
        !self.success
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// `ETag` returned by the server, if any
    pub fn etag(&self) -> Option<&str> {
        self.header("ETag")
    }

    /// Deserialize the result data into `T`
    pub fn deserialize<T: DeserializeOwned>(&self) -> Option<serde_json::Result<T>> {
        self.data.as_ref().map(|value| T::deserialize(value))
    }

    /// Get the result data, returning an error if the operation failed
    pub fn into_result(self) -> Result<Value, String> {
        if self.success {
            Ok(self.data.unwrap_or(Value::Null))
        } else {
            Err(self.error.unwrap_or_else(|| "Unknown error".to_string()))
        }
    }
}
