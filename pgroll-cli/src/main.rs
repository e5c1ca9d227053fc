//! pgroll CLI - command-line interface for the zero-downtime PostgreSQL
//! schema-evolution engine.

use clap::Parser;

use pgroll_cli::cli::{Cli, Command};
use pgroll_cli::commands;
use pgroll_cli::config::Config;
use pgroll_cli::error::CliResult;
use pgroll_cli::output;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    if let Err(err) = run().await {
        output::newline();
        output::error(&err.to_string());
        std::process::exit(1);
    }
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command {
        Command::Init(args) => commands::init::run(&config, args).await,
        Command::Validate(args) => commands::validate::run(&config, args).await,
        Command::Start(args) => commands::start::run(&config, args).await,
        Command::Complete(args) => commands::complete::run(&config, args).await,
        Command::Rollback(args) => commands::rollback::run(&config, args).await,
        Command::Status(args) => commands::status::run(&config, args).await,
    }
}
