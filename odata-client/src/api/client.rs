//! OData client: queries, single operations, batches and async operations

use log::{debug, info, warn};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::api::async_operation::AsyncOperation;
use crate::api::error::{ODataError, Result};
use crate::api::http::{HttpRequest, HttpResponse, HttpSender, ReqwestSender};
use crate::api::operations::{Batch, BatchRequest, BatchResponse, BatchResponseParser, Operation, OperationResult};
use crate::api::query::{Query, QueryResponse, QueryResult};
use crate::api::retry::RetryingSender;
use crate::config::ClientConfig;

/// What a `Prefer: respond-async` request turned into
#[derive(Debug)]
pub enum AsyncResponse<T> {
    /// 202 Accepted; poll the monitor
    Accepted(AsyncOperation<T>),
    /// The server chose to answer synchronously
    Completed(OperationResult),
}

#[derive(Clone)]
pub struct ODataClient {
    sender: Arc<dyn HttpSender>,
    config: ClientConfig,
}

impl ODataClient {
    /// Client backed by `reqwest`, retrying transient failures per `config.retry`
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = Arc::new(ReqwestSender::new(&config)?);
        let sender = Arc::new(RetryingSender::new(transport, config.retry.clone()));
        Ok(Self { sender, config })
    }

    /// Client backed by any transport, e.g. one that adds auth or retries
    pub fn with_sender(config: ClientConfig, sender: Arc<dyn HttpSender>) -> Self {
        Self { sender, config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn request(&self, method: Method, url: impl Into<String>) -> HttpRequest {
        self.config
            .default_headers
            .iter()
            .fold(HttpRequest::new(method, url), |req, (name, value)| {
                req.header(name.clone(), value.clone())
            })
    }

    /// Execute a query and return one page of results
    pub async fn execute_query(&self, query: &Query, cancel: &CancellationToken) -> Result<QueryResult> {
        let url = query.to_url();
        debug!("Executing query: {}", url);

        let mut request = self.request(Method::GET, url);
        for (name, value) in &query.headers {
            request = request.header(name.clone(), value.clone());
        }
        if let Some(size) = self.config.max_page_size {
            request = add_preference(request, &format!("odata.maxpagesize={}", size));
        }

        let response = self.sender.send(request, cancel).await?;
        query_result(response)
    }

    /// GET an absolute or relative URL as a query page (used for `@odata.nextLink`)
    pub async fn fetch_page(&self, url: &str, cancel: &CancellationToken) -> Result<QueryResult> {
        let mut request = self.request(Method::GET, url);
        if let Some(size) = self.config.max_page_size {
            request = add_preference(request, &format!("odata.maxpagesize={}", size));
        }
        let response = self.sender.send(request, cancel).await?;
        query_result(response)
    }

    fn operation_request(&self, operation: &Operation) -> Result<HttpRequest> {
        let mut request = self.request(operation.http_method(), operation.url.clone());
        for (name, value) in &operation.headers {
            request = request.header(name.clone(), value.clone());
        }
        if let Some(etag) = operation.if_match() {
            request = request.header("If-Match", etag);
        }
        if operation.kind.has_body() {
            let body = operation.body.clone().unwrap_or_else(|| Value::Object(Default::default()));
            request = request
                .header("Content-Type", "application/json")
                .body(serde_json::to_vec(&body)?);
        }
        Ok(request)
    }

    fn operation_result(operation: &Operation, response: HttpResponse) -> Result<OperationResult> {
        let result = OperationResult::for_operation(
            operation,
            response.status,
            response.headers,
            response.body,
        );
        if let Some(conflict) = result.conflict_error() {
            warn!("Operation {} on {} hit a concurrency conflict", operation.id, operation.url);
            return Err(conflict);
        }
        Ok(result)
    }

    /// Execute a single operation outside a batch.
    ///
    /// HTTP 412 surfaces as [`ODataError::ConcurrencyConflict`]; other
    /// failures are reported in the returned result.
    pub async fn execute(&self, operation: &Operation, cancel: &CancellationToken) -> Result<OperationResult> {
        debug!("{} {} (operation {})", operation.http_method(), operation.url, operation.id);
        let request = self.operation_request(operation)?;
        let response = self.sender.send(request, cancel).await?;
        Self::operation_result(operation, response)
    }

    /// Send a batch to `$batch` and correlate the per-operation results
    pub async fn execute_batch(&self, batch: &Batch, cancel: &CancellationToken) -> Result<BatchResponse> {
        let encoded = BatchRequest::encode(batch)?;
        info!("Sending batch with {} operations", batch.len());

        let request = self
            .request(Method::POST, "$batch")
            .header("Content-Type", encoded.content_type())
            .body(encoded.body);
        let response = self.sender.send(request, cancel).await?;

        let content_type = response.header("content-type").unwrap_or_default().to_string();
        let multipart = content_type.to_ascii_lowercase().starts_with("multipart/");
        if !response.is_success() && !multipart {
            return Err(ODataError::Http {
                status: response.status,
                body: response.body,
            });
        }

        let operations = batch.flatten_operations();
        let decoded = BatchResponseParser::new(&operations).parse(&response.body, &content_type)?;
        if decoded.has_errors() {
            warn!(
                "Batch finished with {} failed operations out of {}",
                decoded.failed_results().len(),
                decoded.len()
            );
        } else {
            info!("Batch finished, {} operations succeeded", decoded.len());
        }
        Ok(decoded)
    }

    /// Send an operation with `Prefer: respond-async`
    pub async fn start_async<T: DeserializeOwned>(
        &self,
        operation: &Operation,
        cancel: &CancellationToken,
    ) -> Result<AsyncResponse<T>> {
        let request = add_preference(self.operation_request(operation)?, "respond-async");
        let response = self.sender.send(request, cancel).await?;

        if let Some(monitor) = AsyncOperation::from_response(self.sender.clone(), &response, &self.config) {
            return Ok(AsyncResponse::Accepted(monitor));
        }
        debug!("Operation {} completed synchronously ({})", operation.id, response.status);
        Ok(AsyncResponse::Completed(Self::operation_result(operation, response)?))
    }

    /// Resume monitoring a known monitor URL
    pub fn monitor<T: DeserializeOwned>(&self, monitor_url: impl Into<String>) -> AsyncOperation<T> {
        AsyncOperation::new(self.sender.clone(), monitor_url, &self.config)
    }
}

/// Append a preference to any `Prefer` header already on the request
fn add_preference(mut request: HttpRequest, preference: &str) -> HttpRequest {
    let existing = request
        .headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("Prefer"))
        .map(|(name, value)| (name.clone(), value.clone()));
    match existing {
        Some((name, value)) => {
            request.headers.insert(name, format!("{},{}", value, preference));
            request
        }
        None => request.header("Prefer", preference),
    }
}

fn query_result(response: HttpResponse) -> Result<QueryResult> {
    if !response.is_success() {
        warn!("Query failed with {}", response.status);
        return Ok(QueryResult::error(response.status, response.body));
    }
    if response.body.trim().is_empty() {
        return Ok(QueryResult::success(response.status, QueryResponse::default()));
    }
    let body: Value = serde_json::from_str(&response.body)?;
    Ok(QueryResult::success(response.status, QueryResponse::from_body(body)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::http::testing::ScriptedSender;
    use crate::api::operations::Changeset;
    use crate::api::query::{Filter, QueryBuilder};
    use serde::Deserialize;
    use serde_json::json;
    use std::time::Duration;

    fn client_with(sender: &Arc<ScriptedSender>, config: ClientConfig) -> ODataClient {
        ODataClient::with_sender(config, sender.clone())
    }

    fn client(sender: &Arc<ScriptedSender>) -> ODataClient {
        client_with(sender, ClientConfig::default())
    }

    #[tokio::test]
    async fn test_execute_query_and_follow_next_link() {
        let sender = Arc::new(ScriptedSender::new(vec![
            HttpResponse::new(
                200,
                json!({"value": [{"Id": 1}], "@odata.nextLink": "https://h/odata/Products?$skiptoken=1"}).to_string(),
            ),
            HttpResponse::new(200, json!({"value": [{"Id": 2}]}).to_string()),
        ]));
        let client = client_with(&sender, ClientConfig::builder().max_page_size(1).build());
        let cancel = CancellationToken::new();

        let query = QueryBuilder::new("Products")
            .filter(Filter::gt("Price", 10))
            .build()
            .unwrap();
        let first = client.execute_query(&query, &cancel).await.unwrap();
        assert!(first.success);
        assert!(first.has_more());

        let second = first.next_page(&client, &cancel).await.unwrap().unwrap();
        assert_eq!(second.records().unwrap()[0]["Id"], 2);
        assert!(second.next_page(&client, &cancel).await.unwrap().is_none());

        let requests = sender.requests();
        assert_eq!(requests[0].url, "Products?$filter=%28Price%20gt%2010%29");
        assert_eq!(requests[0].headers["Prefer"], "odata.maxpagesize=1");
        assert_eq!(requests[0].headers["OData-Version"], "4.0");
        assert_eq!(requests[1].url, "https://h/odata/Products?$skiptoken=1");
    }

    #[tokio::test]
    async fn test_failed_query_is_a_result_not_an_error() {
        let sender = Arc::new(ScriptedSender::new(vec![HttpResponse::new(404, "no such set")]));
        let query = QueryBuilder::new("Nope").build().unwrap();
        let result = client(&sender).execute_query(&query, &CancellationToken::new()).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.status_code, 404);
        assert_eq!(result.error.as_deref(), Some("no such set"));
    }

    #[tokio::test]
    async fn test_execute_sends_body_and_if_match() {
        let sender = Arc::new(ScriptedSender::new(vec![
            HttpResponse::new(204, "").with_header("ETag", "W/\"4\""),
        ]));
        let op = Operation::update("Products", 3, json!({"Price": 9})).with_etag("W/\"3\"");

        let result = op.execute(&client(&sender), &CancellationToken::new()).await.unwrap();
        assert!(result.is_success());
        assert_eq!(result.etag(), Some("W/\"4\""));

        let request = &sender.requests()[0];
        assert_eq!(request.method, Method::PATCH);
        assert_eq!(request.url, "Products(3)");
        assert_eq!(request.headers["If-Match"], "W/\"3\"");
        assert_eq!(request.headers["Content-Type"], "application/json");
        assert_eq!(request.body.as_deref(), Some(br#"{"Price":9}"#.as_slice()));
    }

    #[tokio::test]
    async fn test_precondition_failed_is_a_conflict() {
        let sender = Arc::new(ScriptedSender::new(vec![
            HttpResponse::new(412, "").with_header("ETag", "W/\"8\""),
        ]));
        let op = Operation::delete("Products", 3).with_etag("W/\"7\"");

        match client(&sender).execute(&op, &CancellationToken::new()).await {
            Err(ODataError::ConcurrencyConflict {
                expected_etag,
                current_etag,
            }) => {
                assert_eq!(expected_etag.as_deref(), Some("W/\"7\""));
                assert_eq!(current_etag.as_deref(), Some("W/\"8\""));
            }
            other => panic!("expected a conflict, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_execute_batch() {
        let response_body = concat!(
            "--resp\r\nContent-Type: application/http\r\n\r\nHTTP/1.1 201 Created\r\n\r\n{\"Id\":5}\r\n",
            "--resp\r\nContent-Type: application/http\r\n\r\nHTTP/1.1 400 Bad Request\r\n\r\nbad\r\n",
            "--resp--\r\n"
        );
        let sender = Arc::new(ScriptedSender::new(vec![
            HttpResponse::new(200, response_body).with_header("Content-Type", "multipart/mixed; boundary=resp"),
        ]));
        let batch = Batch::new()
            .add(Operation::create("Products", json!({"Name": "a"})).with_id("a"))
            .changeset(Changeset::new().add(Operation::create("Products", json!({})).with_id("b")));

        let response = client(&sender).execute_batch(&batch, &CancellationToken::new()).await.unwrap();
        assert!(response.has_errors());
        assert!(response.get("a").unwrap().is_success());
        assert_eq!(response.get("b").unwrap().error.as_deref(), Some("bad"));

        let request = &sender.requests()[0];
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.url, "$batch");
        assert!(request.headers["Content-Type"].starts_with("multipart/mixed; boundary=batch_"));
    }

    #[tokio::test]
    async fn test_rejected_batch_without_multipart_is_an_error() {
        let sender = Arc::new(ScriptedSender::new(vec![
            HttpResponse::new(400, "{\"error\":\"malformed\"}").with_header("Content-Type", "application/json"),
        ]));
        let batch = Batch::new().add(Operation::get("Products"));
        let err = client(&sender).execute_batch(&batch, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ODataError::Http { status: 400, .. }));
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Export {
        url: String,
    }

    #[tokio::test]
    async fn test_start_async_accepted_then_completed() {
        let sender = Arc::new(ScriptedSender::new(vec![
            HttpResponse::new(202, "").with_header("Location", "https://h/monitor/7"),
            HttpResponse::new(200, r#"{"url":"https://h/files/7"}"#),
        ]));
        let config = ClientConfig::builder()
            .poll_interval(Duration::from_millis(5))
            .header("Prefer", "odata.include-annotations=\"*\"")
            .build();
        let client = client_with(&sender, config);
        let cancel = CancellationToken::new();

        let op = Operation::create("Exports", json!({"Format": "csv"}));
        let AsyncResponse::Accepted(mut monitor) = client.start_async::<Export>(&op, &cancel).await.unwrap() else {
            panic!("expected 202 Accepted");
        };
        let export = monitor.wait_for_completion(None, &cancel).await.unwrap();
        assert_eq!(export, Some(Export { url: "https://h/files/7".into() }));

        let requests = sender.requests();
        assert_eq!(requests[0].headers["Prefer"], "odata.include-annotations=\"*\",respond-async");
        assert_eq!(requests[1].url, "https://h/monitor/7");
    }

    #[tokio::test]
    async fn test_start_async_answered_synchronously() {
        let sender = Arc::new(ScriptedSender::new(vec![HttpResponse::new(200, r#"{"url":"x"}"#)]));
        let op = Operation::get("Exports(1)").expecting::<Export>();
        match client(&sender).start_async::<Export>(&op, &CancellationToken::new()).await.unwrap() {
            AsyncResponse::Completed(result) => {
                let export: Export = result.deserialize().unwrap().unwrap();
                assert_eq!(export.url, "x");
            }
            AsyncResponse::Accepted(_) => panic!("expected a synchronous answer"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_requests() {
        let sender = Arc::new(ScriptedSender::new(vec![HttpResponse::new(200, "{}")]));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client(&sender).execute(&Operation::get("Products"), &cancel).await.unwrap_err();
        assert!(matches!(err, ODataError::Cancelled));
        assert_eq!(sender.request_count(), 0);
    }
}
