//! Batch encoding and execution

use anyhow::{Context, Result};
use colored::*;
use tokio_util::sync::CancellationToken;

use super::definition::BatchDefinition;
use super::BatchCommands;
use crate::cli::output::print_batch_response;
use odata_client::api::{BatchRequest, ODataClient};
use odata_client::ClientConfig;

pub async fn handle_batch_command(args: BatchCommands, config: &ClientConfig) -> Result<()> {
    let batch = BatchDefinition::load(&args.file)?.into_batch();
    if batch.is_empty() {
        anyhow::bail!("Batch definition has no operations: {}", args.file.display());
    }

    if !args.send {
        let encoded = BatchRequest::encode(&batch).context("Failed to encode batch")?;
        eprintln!("{} {}", "Content-Type:".bold(), encoded.content_type());
        print!("{}", encoded.body);
        return Ok(());
    }

    let client = ODataClient::new(config.clone())?;
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    for op in batch.flatten_operations() {
        log::debug!("{} {} {}", op.id, op.operation_type(), op.url);
    }
    eprintln!("Sending {} operations...", batch.len().to_string().cyan());
    let response = client
        .execute_batch(&batch, &cancel)
        .await
        .context("Batch request failed")?;

    print_batch_response(&response, args.bodies);
    if response.has_errors() {
        anyhow::bail!("{} operations failed", response.failed_results().len());
    }
    Ok(())
}
