mod cli;
mod commands;

use anyhow::Result;
use cli::{Cli, Command};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Bootstrap { force } => commands::bootstrap(cli.config, force).await,
        Command::Run { port } => commands::run(cli.config, port).await,
        Command::Status { port } => commands::status(cli.config, port).await,
    }
}
