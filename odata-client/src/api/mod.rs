//! OData v4 client API
//!
//! Query building and compilation, `$batch` encoding and decoding, and
//! monitoring of long-running operations started with `Prefer: respond-async`.

pub mod async_operation;
pub mod client;
pub mod error;
pub mod http;
pub mod models;
pub mod operations;
pub mod query;
pub mod retry;

pub use async_operation::{AsyncOperation, AsyncStatus};
pub use client::{AsyncResponse, ODataClient};
pub use error::{ODataError, Result};
pub use http::{HttpRequest, HttpResponse, HttpSender, ReqwestSender};
pub use models::OpenEntity;
pub use operations::{
    Batch, BatchItem, BatchRequest, BatchResponse, BatchResponseParser, Changeset, EtagConflict,
    Operation, OperationKind, OperationResult, ResultType,
};
pub use retry::{RetryConfig, RetryingSender};
pub use query::{EntityKey, Expand, Filter, FilterValue, OrderBy, Query, QueryBuilder, QueryResult};
