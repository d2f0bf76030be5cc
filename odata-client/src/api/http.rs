//! HTTP plumbing shared by queries, batches and async operations
//!
//! Everything above this module talks to an [`HttpSender`]; the production
//! implementation is [`ReqwestSender`], usually wrapped in a
//! [`RetryingSender`](crate::api::retry::RetryingSender).

use async_trait::async_trait;
use log::debug;
use reqwest::Method;
use std::collections::{BTreeMap, HashMap};
use tokio_util::sync::CancellationToken;

use crate::api::error::{ODataError, Result};
use crate::config::ClientConfig;

/// An outgoing request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// Absolute URL, or relative to the service root
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// A final response, after any transport-level retries
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are stored lower-case
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends one request and returns the final response
#[async_trait]
pub trait HttpSender: Send + Sync {
    async fn send(&self, request: HttpRequest, cancel: &CancellationToken) -> Result<HttpResponse>;
}

/// [`HttpSender`] backed by `reqwest`
#[derive(Debug, Clone)]
pub struct ReqwestSender {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl ReqwestSender {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }

    fn resolve(&self, url: &str) -> Result<String> {
        if url.starts_with("http://") || url.starts_with("https://") {
            return Ok(url.to_string());
        }
        match &self.base_url {
            Some(base) => Ok(join_url(base, url)),
            None => Err(ODataError::Config(format!(
                "relative URL '{}' requires a base_url",
                url
            ))),
        }
    }
}

/// Join a service root and a relative path with exactly one `/`
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[async_trait]
impl HttpSender for ReqwestSender {
    async fn send(&self, request: HttpRequest, cancel: &CancellationToken) -> Result<HttpResponse> {
        let url = self.resolve(&request.url)?;
        debug!("{} {}", request.method, url);

        let mut builder = self.client.request(request.method, &url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ODataError::Cancelled),
            response = builder.send() => response?,
        };

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(ODataError::Cancelled),
            body = response.text() => body?,
        };

        debug!("{} -> {}", url, status);
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
