//! SyncML CLI
//!
//! Command-line tools for the SyncML engine.
//!
//! # Commands
//!
//! - `replay` - Feed recorded client messages through an in-memory server
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// SyncML command-line tools.
#[derive(Parser)]
#[command(name = "syncml")]
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
    /// Replay recorded client messages (client_*.xml) against an in-memory server
    Replay {
        /// Directory holding the recorded messages
        #[arg(short, long)]
        dir: PathBuf,

        /// User to register with the backend
        #[arg(short, long)]
        user: Option<String>,

        /// Password of the registered user
        #[arg(short, long)]
        password: Option<String>,

        /// Write every response as server_<n>.xml into this directory
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Replay {
            dir,
            user,
            password,
            out,
            format,
        } => {
            let credentials = match (user, password) {
                (Some(user), Some(password)) => Some((user, password)),
                (None, None) => None,
                _ => return Err("--user and --password must be given together".into()),
            };
            commands::replay::run(&dir, credentials, out.as_deref(), &format)?;
        }
        Commands::Version => {
            println!("SyncML CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("SyncML Engine v{}", syncml_engine::VERSION);
        }
    }

    Ok(())
}
