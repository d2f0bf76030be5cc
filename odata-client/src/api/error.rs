//! Error taxonomy for the OData client
//!
//! Translation errors are raised while compiling filters and keys, protocol
//! errors while decoding batch bodies, and the rest come from the HTTP path or
//! the async-operation monitor.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ODataError {
    /// A predicate node, method or operator the compiler cannot translate
    #[error("unsupported expression ({kind}): {detail}")]
    UnsupportedExpression { kind: &'static str, detail: String },

    /// A value that cannot appear inside an entity key segment
    #[error("invalid entity key: {0}")]
    InvalidKey(String),

    /// A batch that cannot be encoded (e.g. duplicate operation ids)
    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    /// A batch response that is neither multipart nor a JSON batch object
    #[error("invalid batch response: {0}")]
    InvalidBatchResponse(String),

    #[error("async operation at {monitor_url} failed: {error}")]
    AsyncOperationFailed { monitor_url: String, error: String },

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("operation was cancelled")]
    Cancelled,

    /// HTTP 412: the entity changed since the caller read it
    #[error("concurrency conflict: expected ETag {expected_etag:?}, server has {current_etag:?}")]
    ConcurrencyConflict {
        expected_etag: Option<String>,
        current_etag: Option<String>,
    },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ODataError>;

impl ODataError {
    pub(crate) fn unsupported(kind: &'static str, detail: impl Into<String>) -> Self {
        Self::UnsupportedExpression {
            kind,
            detail: detail.into(),
        }
    }

    /// Whether this error came from translating a query rather than from I/O
    pub fn is_translation_error(&self) -> bool {
        matches!(self, Self::UnsupportedExpression { .. } | Self::InvalidKey(_))
    }
}

impl From<reqwest::Error> for ODataError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ODataError::Transport(format!("request timed out: {}", err))
        } else {
            ODataError::Transport(err.to_string())
        }
    }
}
