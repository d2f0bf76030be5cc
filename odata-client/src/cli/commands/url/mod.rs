pub mod handler;

use clap::Args;

use crate::cli::output::OutputFormat;

pub use handler::handle_url_command;

#[derive(Args, Debug)]
pub struct UrlCommands {
    /// Entity set to query
    pub entity_set: String,

    /// Entity key; integers and GUIDs are sent unquoted
    #[arg(long)]
    pub key: Option<String>,

    /// Cast to a derived type (e.g. NS.Employee)
    #[arg(long)]
    pub cast: Option<String>,

    /// Filter clause; repeat to AND several clauses
    #[arg(short, long)]
    pub filter: Vec<String>,

    #[arg(long)]
    pub search: Option<String>,

    /// Comma-separated properties
    #[arg(short, long, value_delimiter = ',')]
    pub select: Vec<String>,

    /// Navigation property to expand; repeatable
    #[arg(short, long)]
    pub expand: Vec<String>,

    /// Order clause such as "Price desc"; repeatable
    #[arg(short, long)]
    pub orderby: Vec<String>,

    #[arg(long)]
    pub skip: Option<u64>,

    #[arg(short, long)]
    pub top: Option<u64>,

    /// Request $count=true
    #[arg(long)]
    pub count: bool,

    #[arg(long)]
    pub apply: Option<String>,

    /// $compute expression; repeatable
    #[arg(long)]
    pub compute: Vec<String>,

    /// Execute the query against the configured service
    #[arg(long)]
    pub send: bool,

    /// Follow @odata.nextLink until the last page
    #[arg(long, requires = "send")]
    pub all_pages: bool,

    #[arg(long, value_enum, default_value = "json")]
    pub format: OutputFormat,
}
