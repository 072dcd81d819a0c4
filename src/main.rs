//! Swiftpack - source-based package manager workspace
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use std::process::ExitCode;
use swiftpack::cli::{commands, Cli, Commands};
use swiftpack::error::SwiftpackResult;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> SwiftpackResult<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 => EnvFilter::new("swiftpack=warn"),
        1 => EnvFilter::new("swiftpack=info"),
        _ => EnvFilter::new("swiftpack=debug"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    // Dispatch to command
    match &cli.command {
        Commands::Resolve => commands::resolve(&cli).await,
        Commands::Fetch(args) => commands::fetch(args, &cli).await,
        Commands::Pins => commands::pins(&cli).await,
        Commands::PurgeCache => commands::purge_cache(&cli).await,
        Commands::Reset => commands::reset(&cli).await,
        Commands::Plugin(args) => commands::plugin(&args.action, &cli).await,
    }
}
