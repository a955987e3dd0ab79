//! MirrorSync CLI
//!
//! Command-line tools for working with entity sync messages.
//!
//! # Commands
//!
//! - `replay` - Apply a message file to an in-memory mirror and print it
//! - `inspect` - Decode and validate a message file
//! - `version` - Show version information

mod commands;
mod config;

use clap::{Parser, Subcommand};
use commands::replay::ReplayOptions;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// MirrorSync command-line tools.
#[derive(Parser)]
#[command(name = "mirrorsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a JSON-lines message file to an in-memory mirror
    Replay {
        /// Message file, one JSON message per line
        #[arg(short, long)]
        input: PathBuf,

        /// Subscriber config (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Include soft-deleted records in the output
        #[arg(long)]
        include_deleted: bool,

        /// Process messages one at a time, in file order
        #[arg(long)]
        sequential: bool,

        /// Override the organic dependency wait, in milliseconds
        #[arg(long)]
        organic_wait_ms: Option<u64>,

        /// Override the force-sync dependency wait, in milliseconds
        #[arg(long)]
        force_wait_ms: Option<u64>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Decode and validate a JSON-lines message file
    Inspect {
        /// Message file, one JSON message per line
        #[arg(short, long)]
        input: PathBuf,

        /// Also check messages against a subscriber config
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose.
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Replay {
            input,
            config,
            include_deleted,
            sequential,
            organic_wait_ms,
            force_wait_ms,
            format,
        } => {
            let options = ReplayOptions {
                include_deleted,
                sequential,
                organic_wait: organic_wait_ms.map(Duration::from_millis),
                force_sync_wait: force_wait_ms.map(Duration::from_millis),
            };
            commands::replay::run(&input, &config, &options, &format)?;
        }
        Commands::Inspect {
            input,
            config,
            format,
        } => {
            commands::inspect::run(&input, config.as_deref(), &format)?;
        }
        Commands::Version => {
            println!("MirrorSync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
