//! lifeline CLI - keep documents alive in a content-addressed store

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lifeline_config::Config;
use lifeline_keeper::DocumentId;
use lifeline_telemetry::{init_logging, LogConfig};

mod commands;

use commands::run::{self, Store};
use commands::{documents, journal, Workspace};

#[derive(Parser)]
#[command(name = "lifeline")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file
    #[arg(short, long, default_value = "lifeline.toml", global = true)]
    config: PathBuf,

    /// Override the state directory from the configuration
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a document by its root reference
    Add {
        /// Root reference (CHK@..., USK@.../site/3, ...)
        reference: String,
    },
    /// Stop tracking a document and delete its manifest, journal and root copy
    Remove {
        /// Document id
        id: DocumentId,
    },
    /// List tracked documents with availability statistics
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show the monthly persistence history of a document
    History {
        /// Document id
        id: DocumentId,
    },
    /// Forget the persistence history of a document
    ClearHistory {
        /// Document id
        id: DocumentId,
    },
    /// Re-run discovery for a document, clearing a failed root
    Retry {
        /// Document id
        id: DocumentId,
    },
    /// Print the journal of the last pass over a document
    Log {
        /// Document id
        id: DocumentId,
    },
    /// Print the effective configuration
    Config,
    /// Keep every tracked document alive until Ctrl+C
    Run {
        /// Content store to talk to
        #[arg(long, value_enum, default_value_t = Store::Memory)]
        store: Store,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    if let Some(state_dir) = cli.state_dir {
        config.storage.state_dir = state_dir;
    }

    let logging = LogConfig::from_settings(&config.logging.level, &config.logging.format)?
        .with_verbosity(cli.verbose);
    init_logging(&logging).context("Failed to initialize logging")?;

    let mut out = std::io::stdout().lock();
    match cli.command {
        Commands::Add { reference } => documents::add(&Workspace::open(&config)?, &reference, &mut out),
        Commands::Remove { id } => documents::remove(&Workspace::open(&config)?, id, &mut out),
        Commands::List { json } => documents::list(&Workspace::open(&config)?, json, &mut out),
        Commands::History { id } => documents::history(&Workspace::open(&config)?, id, &mut out),
        Commands::ClearHistory { id } => {
            documents::clear_history(&Workspace::open(&config)?, id, &mut out)
        }
        Commands::Retry { id } => documents::retry(&Workspace::open(&config)?, id, &mut out),
        Commands::Log { id } => journal::execute(&Workspace::open(&config)?, id, &mut out),
        Commands::Config => commands::config::execute(&config, &mut out),
        Commands::Run { store } => run::execute(&config, store.connect(), run::ctrl_c(), &mut out).await,
    }
}
