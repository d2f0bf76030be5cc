//! Async operation monitoring

use anyhow::{Context, Result};
use colored::*;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::PollCommands;
use crate::cli::output::format_output;
use odata_client::api::{ODataClient, ODataError};
use odata_client::ClientConfig;

pub async fn handle_poll_command(args: PollCommands, config: &ClientConfig) -> Result<()> {
    let client = ODataClient::new(config.clone())?;
    let mut operation = client.monitor::<Value>(&args.monitor_url);
    if let Some(secs) = args.interval {
        operation = operation.with_poll_interval(Duration::from_secs(secs));
    }

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    if args.cancel {
        if operation.try_cancel(&cancel).await? {
            println!("{} {}", "Cancelled".bright_yellow(), args.monitor_url);
            return Ok(());
        }
        anyhow::bail!("Server refused to cancel {}", args.monitor_url);
    }

    eprintln!("Waiting for {}...", args.monitor_url.cyan());
    let timeout = args.timeout.map(Duration::from_secs);
    match operation.wait_for_completion(timeout, &cancel).await {
        Ok(Some(result)) => {
            println!("{}", format_output(&result, args.format)?);
            Ok(())
        }
        Ok(None) => {
            println!("{}", "Completed".bright_green());
            Ok(())
        }
        Err(ODataError::Cancelled) => {
            eprintln!("{}", "Interrupted, cancelling server-side operation".yellow());
            let cleanup = CancellationToken::new();
            match operation.try_cancel(&cleanup).await {
                Ok(true) => eprintln!("Operation cancelled"),
                Ok(false) => eprintln!("Server did not accept the cancel"),
                Err(e) => log::warn!("Cancel request failed: {}", e),
            }
            anyhow::bail!("Interrupted")
        }
        Err(e) => Err(e).context(format!("Async operation did not complete ({})", operation.status())),
    }
}
