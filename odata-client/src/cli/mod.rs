//! Command-line interface

pub mod commands;
pub mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::batch::BatchCommands;
use commands::decode::DecodeCommands;
use commands::poll::PollCommands;
use commands::url::UrlCommands;
use odata_client::ClientConfig;

#[derive(Parser)]
#[command(name = "odata-cli", version, about = "Build OData URLs, run $batch requests and watch async operations")]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Config file (defaults to <config dir>/odata-client/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Service root, overrides the config file and ODATA_BASE_URL
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Render a query URL, optionally executing it
    Url(UrlCommands),
    /// Encode a batch definition, optionally sending it
    Batch(BatchCommands),
    /// Decode a saved batch response
    Decode(DecodeCommands),
    /// Wait for an async operation monitor URL
    Poll(PollCommands),
}

impl Cli {
    pub fn load_config(&self) -> Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::load(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?
                .with_env_overrides()?,
            None => ClientConfig::load_default().context("Failed to load default config")?,
        };
        if let Some(url) = &self.base_url {
            config.base_url = Some(url.clone());
        }
        Ok(config)
    }
}
