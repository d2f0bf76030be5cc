//! Client configuration with builder pattern
//!
//! Defaults are usable as-is; values can come from a TOML file
//! (`<config dir>/odata-client/config.toml`) and be overridden by
//! environment variables (optionally loaded from `.env`).

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::error::{ODataError, Result};
use crate::api::retry::RetryConfig;

pub const ENV_BASE_URL: &str = "ODATA_BASE_URL";
pub const ENV_POLL_INTERVAL_MS: &str = "ODATA_POLL_INTERVAL_MS";
pub const ENV_TIMEOUT_MS: &str = "ODATA_TIMEOUT_MS";

/// Configuration shared by the transport, the batch executor and async monitors
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Service root; relative request URLs are resolved against it
    pub base_url: Option<String>,
    /// Delay between async-operation polls
    pub poll_interval: Duration,
    /// Default limit for waiting on async operations (`None` waits forever)
    pub default_timeout: Option<Duration>,
    /// Per-request transport timeout
    pub request_timeout: Duration,
    /// Headers sent with every request
    pub default_headers: BTreeMap<String, String>,
    /// Emits `Prefer: odata.maxpagesize=N` on queries
    pub max_page_size: Option<u32>,
    /// Transport retries for throttling and gateway errors
    pub retry: RetryConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let mut default_headers = BTreeMap::new();
        default_headers.insert("Accept".to_string(), "application/json".to_string());
        default_headers.insert("OData-MaxVersion".to_string(), "4.0".to_string());
        default_headers.insert("OData-Version".to_string(), "4.0".to_string());

        Self {
            base_url: None,
            poll_interval: Duration::from_secs(5),
            default_timeout: None,
            request_timeout: Duration::from_secs(120),
            default_headers,
            max_page_size: None,
            retry: RetryConfig::default(),
        }
    }
}

/// On-disk representation
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    base_url: Option<String>,
    poll_interval_ms: Option<u64>,
    timeout_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
    max_page_size: Option<u32>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    retry: Option<RetryConfig>,
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Parse a TOML document on top of the defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(content)
            .map_err(|e| ODataError::Config(format!("invalid config: {}", e)))?;

        let mut config = Self::default();
        if let Some(url) = file.base_url {
            config.base_url = Some(url);
        }
        if let Some(ms) = file.poll_interval_ms {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = file.timeout_ms {
            config.default_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(ms) = file.request_timeout_ms {
            config.request_timeout = Duration::from_millis(ms);
        }
        config.max_page_size = file.max_page_size.or(config.max_page_size);
        config.default_headers.extend(file.headers);
        if let Some(retry) = file.retry {
            config.retry = retry;
        }
        Ok(config)
    }

    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ODataError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("odata-client").join("config.toml"))
    }

    /// Load the default config file if present, then apply environment overrides
    pub fn load_default() -> Result<Self> {
        let config = match Self::default_path() {
            Some(path) if path.exists() => {
                log::debug!("Loading config from {}", path.display());
                Self::load(&path)?
            }
            _ => Self::default(),
        };
        config.with_env_overrides()
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Apply `ODATA_*` environment variables, reading `.env` first if present
    pub fn with_env_overrides(self) -> Result<Self> {
        dotenvy::dotenv().ok();
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_BASE_URL).filter(|s| !s.is_empty()) {
            self.base_url = Some(url);
        }
        if let Some(ms) = lookup(ENV_POLL_INTERVAL_MS) {
            self.poll_interval = Duration::from_millis(parse_millis(ENV_POLL_INTERVAL_MS, &ms)?);
        }
        if let Some(ms) = lookup(ENV_TIMEOUT_MS) {
            self.default_timeout = Some(Duration::from_millis(parse_millis(ENV_TIMEOUT_MS, &ms)?));
        }
        Ok(self)
    }
}

fn parse_millis(name: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| ODataError::Config(format!("{} must be milliseconds, got '{}'", name, value)))
}

/// Builder for ClientConfig
#[derive(Debug)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = Some(timeout);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.insert(name.into(), value.into());
        self
    }

    pub fn max_page_size(mut self, size: u32) -> Self {
        self.config.max_page_size = Some(size);
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
