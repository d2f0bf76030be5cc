pub mod handler;

use clap::Args;

use crate::cli::output::OutputFormat;

pub use handler::handle_poll_command;

#[derive(Args, Debug)]
pub struct PollCommands {
    /// Monitor URL from the Location header of a 202 Accepted response
    pub monitor_url: String,

    /// Give up after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Seconds between polls (defaults to the configured interval)
    #[arg(long)]
    pub interval: Option<u64>,

    /// DELETE the monitor instead of waiting
    #[arg(long)]
    pub cancel: bool,

    #[arg(long, value_enum, default_value = "json")]
    pub format: OutputFormat,
}
