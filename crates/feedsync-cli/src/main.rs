//! # feedsync-cli
//!
//! Command-line interface for replaying and inspecting feedsync recordings.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use feedsync_core::{format_error_with_suggestion, Config};

mod commands;
mod recording;

/// Application context containing shared state.
pub struct AppContext {
    pub config: Config,
}

/// feedsync - replay recorded feed traffic through the session engine
#[derive(Parser)]
#[command(name = "feedsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a recording and print every session's view
    Replay {
        /// Recording file (JSON)
        file: PathBuf,
        /// Persist payloads to this SQLite database
        #[arg(long, value_name = "PATH")]
        store: Option<PathBuf>,
        /// Number of sessions to open after the batches are applied
        #[arg(short = 'n', long, default_value = "1")]
        session_count: usize,
    },
    /// Apply a recording and print engine diagnostics as JSON
    Dump {
        /// Recording file (JSON)
        file: PathBuf,
        /// Persist payloads to this SQLite database
        #[arg(long, value_name = "PATH")]
        store: Option<PathBuf>,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show version information
    Version,
    /// Diagnose installation issues
    Doctor,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration and validation findings
    Show,
    /// Print the user config file location
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config, using defaults: {}", e);
        Config::default()
    });

    let ctx = AppContext { config };

    if let Err(e) = run(cli.command, &ctx).await {
        match e.downcast_ref::<feedsync_core::Error>() {
            Some(engine_error) => eprintln!("Error: {}", format_error_with_suggestion(engine_error)),
            None => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }

    Ok(())
}

async fn run(command: Commands, ctx: &AppContext) -> anyhow::Result<()> {
    match command {
        Commands::Replay {
            file,
            store,
            session_count,
        } => {
            commands::replay::run(ctx, &file, store, session_count).await?;
        }
        Commands::Dump { file, store } => {
            commands::dump::run(ctx, &file, store).await?;
        }
        Commands::Config { action } => {
            commands::config::handle(action, ctx)?;
        }
        Commands::Version => {
            println!("feedsync {}", env!("CARGO_PKG_VERSION"));
        }
        Commands::Doctor => {
            commands::doctor::run(ctx)?;
        }
    }

    Ok(())
}
