mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "batchline",
    version,
    about = "Operator tooling for batchline pipelines"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or reset the committed source offset
    Offset {
        #[command(subcommand)]
        action: OffsetAction,
    },
    /// Work with monitoring rule definitions
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },
    /// Validate runner configuration and state backend
    Check {
        /// Path to runner YAML file
        config: PathBuf,
    },
}

#[derive(Subcommand)]
enum OffsetAction {
    /// Print the committed offset
    Show {
        /// Path to runner YAML file
        config: PathBuf,
    },
    /// Reset the committed offset so the next run starts over
    Reset {
        /// Path to runner YAML file
        config: PathBuf,
    },
}

#[derive(Subcommand)]
enum RulesAction {
    /// Print the change request between two rule files as JSON
    Diff {
        /// Rule definitions currently applied
        previous: PathBuf,
        /// Rule definitions to move to
        next: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Offset { action } => match action {
            OffsetAction::Show { config } => commands::offset::show(&config),
            OffsetAction::Reset { config } => commands::offset::reset(&config),
        },
        Commands::Rules { action } => match action {
            RulesAction::Diff { previous, next } => commands::rules::diff(&previous, &next),
        },
        Commands::Check { config } => commands::check::execute(&config),
    }
}
