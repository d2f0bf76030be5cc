//! Query execution results and paging

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::api::error::Result;

/// Body of a collection response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub value: Vec<Value>,
    #[serde(rename = "@odata.count", default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(rename = "@odata.nextLink", default, skip_serializing_if = "Option::is_none")]
    pub next_link: Option<String>,
}

impl QueryResponse {
    /// Interpret a response body. A single entity (no `value` array) becomes
    /// a one-element page.
    pub fn from_body(body: Value) -> Result<Self> {
        if body.get("value").is_some_and(Value::is_array) {
            return Ok(serde_json::from_value(body)?);
        }
        Ok(Self {
            value: vec![body],
            count: None,
            next_link: None,
        })
    }
}

/// Outcome of one query request
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub success: bool,
    pub status_code: u16,
    pub data: Option<QueryResponse>,
    pub error: Option<String>,
}

impl QueryResult {
    pub fn success(status_code: u16, data: QueryResponse) -> Self {
        Self {
            success: true,
            status_code,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(status_code: u16, error: String) -> Self {
        Self {
            success: false,
            status_code,
            data: None,
            error: Some(error),
        }
    }

    pub fn records(&self) -> Option<&Vec<Value>> {
        self.data.as_ref().map(|d| &d.value)
    }

    /// Total count when `$count=true` was requested
    pub fn count(&self) -> Option<u64> {
        self.data.as_ref().and_then(|d| d.count)
    }

    pub fn next_link(&self) -> Option<&str> {
        self.data.as_ref().and_then(|d| d.next_link.as_deref())
    }

    pub fn has_more(&self) -> bool {
        self.next_link().is_some()
    }

    /// Deserialize every record on this page
    pub fn deserialize_records<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        let records = self.records().map(Vec::as_slice).unwrap_or_default();
        records
            .iter()
            .map(|record| T::deserialize(record).map_err(Into::into))
            .collect()
    }

    /// Follow `@odata.nextLink`. Returns `None` on the last page.
    pub async fn next_page(
        &self,
        client: &crate::api::ODataClient,
        cancel: &CancellationToken,
    ) -> Result<Option<QueryResult>> {
        match self.next_link() {
            Some(link) => Ok(Some(client.fetch_page(link, cancel).await?)),
            None => Ok(None),
        }
    }
}
