use anyhow::Result;
use clap::Parser;
use colored::*;
use odata_client::ODataError;

mod cli;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let config = cli.load_config()?;
    log::debug!("Service root: {:?}", config.base_url);

    let result = match cli.command {
        Commands::Url(args) => cli::commands::url::handle_url_command(args, &config).await,
        Commands::Batch(args) => cli::commands::batch::handle_batch_command(args, &config).await,
        Commands::Decode(args) => cli::commands::decode::handle_decode_command(args),
        Commands::Poll(args) => cli::commands::poll::handle_poll_command(args, &config).await,
    };

    if let Err(err) = &result {
        let untranslatable = err
            .chain()
            .filter_map(|cause| cause.downcast_ref::<ODataError>())
            .any(ODataError::is_translation_error);
        if untranslatable {
            eprintln!(
                "{} the query could not be translated to OData; nothing was sent",
                "Note:".yellow().bold()
            );
        }
    }
    result
}
