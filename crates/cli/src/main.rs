//! Fableloom CLI — the main entry point.
//!
//! Commands:
//! - `play`     — Run a scenario interactively in the terminal
//! - `inspect`  — Validate a scenario file and print its contents

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "fableloom",
    about = "Fableloom — an LLM-narrated interactive fiction engine",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a scenario interactively
    Play {
        /// Path to the scenario JSON file
        scenario: PathBuf,

        /// Override the configured model
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Validate a scenario file and print a summary
    Inspect {
        /// Path to the scenario JSON file
        scenario: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Play { scenario, model } => commands::play::run(&scenario, model).await?,
        Commands::Inspect { scenario } => commands::inspect::run(&scenario)?,
    }

    Ok(())
}
