//! Typed client for OData v4 services

pub mod api;
pub mod config;

pub use api::{ODataClient, ODataError, Result};
pub use config::ClientConfig;
