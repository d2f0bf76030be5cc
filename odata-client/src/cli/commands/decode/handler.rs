//! Offline batch response decoding

use anyhow::{Context, Result};

use super::DecodeCommands;
use crate::cli::commands::batch::definition::BatchDefinition;
use crate::cli::output::print_batch_response;
use odata_client::api::{Batch, BatchResponseParser};

pub fn handle_decode_command(args: DecodeCommands) -> Result<()> {
    let body = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read response: {}", args.file.display()))?;

    let batch = match &args.definition {
        Some(path) => BatchDefinition::load(path)?.into_batch(),
        None => Batch::new(),
    };
    let operations = batch.flatten_operations();

    let response = BatchResponseParser::new(&operations)
        .parse(&body, &args.content_type)
        .context("Failed to decode batch response")?;

    if response.is_empty() {
        println!("Response contained no operation results");
        return Ok(());
    }
    print_batch_response(&response, args.bodies);
    Ok(())
}
