//! Retrying transport wrapper
//!
//! [`RetryingSender`] re-sends requests that failed in a way the server
//! is likely to recover from (throttling, gateway errors, dropped
//! connections) with exponential backoff. Callers above it only ever see
//! the final response.

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Method;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::api::error::{ODataError, Result};
use crate::api::http::{HttpRequest, HttpResponse, HttpSender};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    #[serde(with = "millis")]
    pub base_delay: Duration,
    #[serde(with = "millis")]
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Single attempt
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    pub fn conservative() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as i32;
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        let delay = Duration::try_from_secs_f64(self.base_delay.as_secs_f64() * factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);
        if self.jitter {
            delay.mul_f64(rand::random_range(0.5..=1.0))
        } else {
            delay
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Whether a request can be re-sent after the server may have processed it
fn is_idempotent(method: &Method) -> bool {
    [Method::GET, Method::HEAD, Method::PUT, Method::DELETE, Method::OPTIONS].contains(method)
}

/// 429 and 503 mean the request was not processed; other gateway errors
/// are only safe to retry for idempotent methods
fn is_retryable_status(status: u16, method: &Method) -> bool {
    match status {
        429 | 503 => true,
        500 | 502 | 504 => is_idempotent(method),
        _ => false,
    }
}

/// Server-requested delay from `Retry-After` (seconds form only)
fn retry_after(response: &HttpResponse) -> Option<Duration> {
    response
        .header("retry-after")
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// [`HttpSender`] that retries transient failures of an inner sender
pub struct RetryingSender {
    inner: Arc<dyn HttpSender>,
    config: RetryConfig,
}

impl RetryingSender {
    pub fn new(inner: Arc<dyn HttpSender>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    async fn pause(&self, delay: Duration, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            _ = cancel.cancelled() => Err(ODataError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

#[async_trait]
impl HttpSender for RetryingSender {
    async fn send(&self, request: HttpRequest, cancel: &CancellationToken) -> Result<HttpResponse> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let outcome = self.inner.send(request.clone(), cancel).await;
            let last_attempt = attempt >= max_attempts;

            let delay = match &outcome {
                Ok(response) if !last_attempt && is_retryable_status(response.status, &request.method) => {
                    let delay = retry_after(response)
                        .map(|d| d.min(self.config.max_delay))
                        .unwrap_or_else(|| self.config.delay_for(attempt));
                    warn!(
                        "{} {} returned {}, retrying in {:?} (attempt {}/{})",
                        request.method, request.url, response.status, delay, attempt, max_attempts
                    );
                    delay
                }
                Err(ODataError::Transport(e)) if !last_attempt && is_idempotent(&request.method) => {
                    let delay = self.config.delay_for(attempt);
                    warn!(
                        "{} {} failed: {}, retrying in {:?} (attempt {}/{})",
                        request.method, request.url, e, delay, attempt, max_attempts
                    );
                    delay
                }
                _ => {
                    if attempt > 1 {
                        debug!("{} {} settled after {} attempts", request.method, request.url, attempt);
                    }
                    return outcome;
                }
            };

            self.pause(delay, cancel).await?;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::http::testing::ScriptedSender;

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let config = RetryConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            jitter: false,
            ..RetryConfig::default()
        };
        assert_eq!(config.delay_for(1), Duration::from_millis(100));
        assert_eq!(config.delay_for(2), Duration::from_millis(200));
        assert_eq!(config.delay_for(3), Duration::from_millis(300));
        assert_eq!(config.delay_for(10), Duration::from_millis(300));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let config = RetryConfig {
            base_delay: Duration::from_millis(100),
            ..RetryConfig::default()
        };
        for _ in 0..50 {
            let delay = config.delay_for(1);
            assert!(delay >= Duration::from_millis(50) && delay <= Duration::from_millis(100));
        }
    }

    #[tokio::test]
    async fn test_throttled_request_is_retried() {
        let inner = Arc::new(ScriptedSender::new(vec![
            HttpResponse::new(429, "").with_header("Retry-After", "0"),
            HttpResponse::new(503, ""),
            HttpResponse::new(200, "{}"),
        ]));
        let sender = RetryingSender::new(inner.clone(), fast());
        let response = sender
            .send(HttpRequest::new(Method::POST, "$batch"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(inner.request_count(), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let inner = Arc::new(ScriptedSender::repeating(HttpResponse::new(502, "bad gateway")));
        let sender = RetryingSender::new(inner.clone(), fast());
        let response = sender
            .send(HttpRequest::get("Products"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.status, 502);
        assert_eq!(inner.request_count(), 3);
    }

    #[tokio::test]
    async fn test_non_idempotent_gateway_error_is_final() {
        let inner = Arc::new(ScriptedSender::repeating(HttpResponse::new(502, "")));
        let sender = RetryingSender::new(inner.clone(), fast());
        sender
            .send(HttpRequest::new(Method::PATCH, "Products(1)"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(inner.request_count(), 1);
    }

    #[tokio::test]
    async fn test_transport_errors_retry_for_get() {
        // the script runs dry after one response, which surfaces as a transport error
        let inner = Arc::new(ScriptedSender::new(vec![HttpResponse::new(500, "")]));
        let sender = RetryingSender::new(inner.clone(), fast());
        let err = sender
            .send(HttpRequest::get("Products"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ODataError::Transport(_)));
        assert_eq!(inner.request_count(), 3);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let inner = Arc::new(ScriptedSender::repeating(HttpResponse::new(404, "")));
        let sender = RetryingSender::new(inner.clone(), RetryConfig::conservative());
        sender
            .send(HttpRequest::get("Nope"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(inner.request_count(), 1);
    }

    #[test]
    fn test_config_from_toml() {
        let config: RetryConfig = toml::from_str("max_attempts = 5\nbase_delay = 250").unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_delay, Duration::from_millis(250));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!(RetryConfig::disabled().max_attempts == 1);
    }
}
