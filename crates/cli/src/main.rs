//! Hangar CLI - Command-line interface for the Hangar deployment core
//!
//! Usage:
//!   hangar init [dir]                 - Lay out a base directory
//!   hangar start                      - Deploy everything and watch for changes
//!   hangar resolve <artifact-dir>     - Print the isolation graph of an artifact
//!   hangar status                     - Reconcile once and print what is deployed

mod commands;

use clap::{Parser, Subcommand};
use commands::{ConfigArgs, InitCommand, ResolveCommand, StartCommand, StatusCommand};

#[derive(Parser)]
#[command(name = "hangar")]
#[command(about = "Hangar - Hot deployment of applications, domains and policies")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a base directory
    Init(InitCommand),
    /// Run the deployment service and the directory watcher
    Start(StartCommand),
    /// Resolve the isolation graph of an expanded artifact
    Resolve(ResolveCommand),
    /// Show deployed artifacts and failures
    Status(StatusCommand),
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init(cmd) => cmd.run(&cli.config),
        Commands::Start(cmd) => cmd.run(&cli.config),
        Commands::Resolve(cmd) => cmd.run(&cli.config),
        Commands::Status(cmd) => cmd.run(&cli.config),
    }
}
