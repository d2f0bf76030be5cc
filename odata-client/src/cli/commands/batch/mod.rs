pub mod definition;
pub mod handler;

use clap::Args;
use std::path::PathBuf;

pub use handler::handle_batch_command;

#[derive(Args, Debug)]
pub struct BatchCommands {
    /// JSON batch definition file
    pub file: PathBuf,

    /// Send the batch instead of printing the encoded body
    #[arg(long)]
    pub send: bool,

    /// Print response bodies of successful operations
    #[arg(long)]
    pub bodies: bool,
}
