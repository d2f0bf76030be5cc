pub mod handler;

use clap::Args;
use std::path::PathBuf;

pub use handler::handle_decode_command;

#[derive(Args, Debug)]
pub struct DecodeCommands {
    /// Saved response body
    pub file: PathBuf,

    /// Response Content-Type; without a boundary the body is read as a JSON batch
    #[arg(long, default_value = "application/json")]
    pub content_type: String,

    /// Batch definition the response answers, for correlation and ids
    #[arg(long)]
    pub definition: Option<PathBuf>,

    /// Print response bodies of successful operations
    #[arg(long)]
    pub bodies: bool,
}
