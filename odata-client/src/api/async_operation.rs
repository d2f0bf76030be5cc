//! Long-running operations started with `Prefer: respond-async`
//!
//! The server answers 202 Accepted with a `Location` monitor URL. An
//! [`AsyncOperation`] polls that URL until the job completes, fails, or is
//! cancelled.

use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::api::error::{ODataError, Result};
use crate::api::http::{HttpRequest, HttpResponse, HttpSender};
use crate::config::ClientConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AsyncStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl AsyncStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for AsyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// A server-side job reached through its monitor URL
pub struct AsyncOperation<T> {
    sender: Arc<dyn HttpSender>,
    monitor_url: String,
    status: AsyncStatus,
    result: Option<T>,
    error: Option<String>,
    poll_interval: Duration,
    default_timeout: Option<Duration>,
    headers: BTreeMap<String, String>,
}

impl<T: DeserializeOwned> AsyncOperation<T> {
    pub fn new(sender: Arc<dyn HttpSender>, monitor_url: impl Into<String>, config: &ClientConfig) -> Self {
        Self {
            sender,
            monitor_url: monitor_url.into(),
            status: AsyncStatus::Pending,
            result: None,
            error: None,
            poll_interval: config.poll_interval,
            default_timeout: config.default_timeout,
            headers: config.default_headers.clone(),
        }
    }

    /// Start monitoring if the response is 202 Accepted with a `Location`
    pub fn from_response(
        sender: Arc<dyn HttpSender>,
        response: &HttpResponse,
        config: &ClientConfig,
    ) -> Option<Self> {
        if response.status != 202 {
            return None;
        }
        let location = response.header("location")?;
        info!("Async operation accepted, monitoring {}", location);
        Some(Self::new(sender, location, config))
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn monitor_url(&self) -> &str {
        &self.monitor_url
    }

    pub fn status(&self) -> AsyncStatus {
        self.status
    }

    pub fn result(&self) -> Option<&T> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn request(&self, request: HttpRequest) -> HttpRequest {
        self.headers
            .iter()
            .fold(request, |req, (name, value)| req.header(name.clone(), value.clone()))
    }

    /// GET the monitor URL once and update the state.
    ///
    /// Does nothing once the operation is terminal.
    pub async fn poll(&mut self, cancel: &CancellationToken) -> Result<AsyncStatus> {
        if self.status.is_terminal() {
            return Ok(self.status);
        }

        let request = self.request(HttpRequest::get(self.monitor_url.clone()));
        let response = self.sender.send(request, cancel).await?;

        match response.status {
            202 => {
                self.status = AsyncStatus::Running;
                if let Some(location) = response.header("location") {
                    if location != self.monitor_url {
                        debug!("Monitor moved from {} to {}", self.monitor_url, location);
                        self.monitor_url = location.to_string();
                    }
                }
            }
            status if response.is_success() => {
                debug!("Async operation at {} completed with {}", self.monitor_url, status);
                self.status = AsyncStatus::Completed;
                if !response.body.trim().is_empty() {
                    match serde_json::from_str::<T>(&response.body) {
                        Ok(value) => self.result = Some(value),
                        Err(e) => warn!(
                            "Async operation at {} completed but the result could not be read: {}",
                            self.monitor_url, e
                        ),
                    }
                }
            }
            status => {
                warn!("Async operation at {} failed with {}", self.monitor_url, status);
                self.status = AsyncStatus::Failed;
                self.error = Some(response.body);
            }
        }
        Ok(self.status)
    }

    /// Poll until the operation is terminal and return its result.
    ///
    /// `timeout` falls back to the configured default; `None` waits forever.
    /// The result is moved out on success.
    pub async fn wait_for_completion(
        &mut self,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<Option<T>> {
        match timeout.or(self.default_timeout) {
            Some(limit) => {
                match tokio::time::timeout(limit, self.poll_until_terminal(cancel)).await {
                    Ok(outcome) => outcome?,
                    Err(_) => {
                        warn!("Gave up on {} after {:?}", self.monitor_url, limit);
                        return Err(ODataError::Timeout(limit));
                    }
                }
            }
            None => self.poll_until_terminal(cancel).await?,
        }

        match self.status {
            AsyncStatus::Failed => Err(ODataError::AsyncOperationFailed {
                monitor_url: self.monitor_url.clone(),
                error: self.error.clone().unwrap_or_default(),
            }),
            AsyncStatus::Cancelled => Err(ODataError::Cancelled),
            _ => Ok(self.result.take()),
        }
    }

    async fn poll_until_terminal(&mut self, cancel: &CancellationToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(ODataError::Cancelled);
            }
            if self.poll(cancel).await?.is_terminal() {
                return Ok(());
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(ODataError::Cancelled),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// DELETE the monitor URL. Returns whether the server accepted the cancel.
    pub async fn try_cancel(&mut self, cancel: &CancellationToken) -> Result<bool> {
        if self.status.is_terminal() {
            return Ok(false);
        }
        let request = self.request(HttpRequest::delete(self.monitor_url.clone()));
        let response = self.sender.send(request, cancel).await?;
        if response.is_success() {
            info!("Cancelled async operation at {}", self.monitor_url);
            self.status = AsyncStatus::Cancelled;
            Ok(true)
        } else {
            debug!("Cancel of {} refused with {}", self.monitor_url, response.status);
            Ok(false)
        }
    }
}

impl<T> fmt::Debug for AsyncOperation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncOperation")
            .field("monitor_url", &self.monitor_url)
            .field("status", &self.status)
            .field("error", &self.error)
            .finish()
    }
}
