use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod args;
mod server;

use args::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // https://no-color.org/ — suppress the startup accents when asked.
    if std::env::var_os("NO_COLOR").is_some() {
        owo_colors::set_override(false);
    }

    let filter = EnvFilter::try_from_env("KECS_LOG_LEVEL")
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Server(args) => server::run_server(args).await,
        Commands::Health(args) => server::run_health(args).await,
    }
}
