//! # Testcase Retriever CLI (`tcr`)
//!
//! ## Usage
//!
//! ```bash
//! tcr --config ./config/tcr.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tcr init` | Create the SQLite cache database and the corpus directory |
//! | `tcr index` | Build the keyword index and warm the embedding cache |
//! | `tcr retrieve "<text>"` | Rank test cases against a change request |
//! | `tcr cache stats` | Show what the embedding cache holds |
//! | `tcr cache reset` | Delete every cached embedding |
//!
//! Logs go to stderr and are filtered by `RUST_LOG` (default `info`).

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use testcase_retriever::models::ChangeType;
use testcase_retriever::{config, migrate, retrieve_cmd, stats};

/// Rank test cases by relevance to a change request.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file is an error; an empty file means all defaults.
#[derive(Parser)]
#[command(
    name = "tcr",
    about = "Hybrid keyword + semantic retrieval of test cases for change requests",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tcr.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the cache database and the corpus directory. Idempotent.
    Init,

    /// Build the keyword index and warm the embedding cache.
    Index {
        /// Print the summary as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Rank test cases against a change request.
    Retrieve {
        /// Change request text: title, description, acceptance criteria.
        text: String,

        /// `bug_fix`, `feature_update`, or `new_feature`.
        #[arg(long, default_value = "feature_update", value_parser = parse_change_type)]
        change_type: ChangeType,

        /// Maximum number of matches. Defaults to the configured value
        /// for the change type.
        #[arg(long)]
        top_k: Option<usize>,

        /// Print matches and notes as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Inspect or clear the embedding cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Record counts per model version.
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Delete every cached embedding (e.g. after a model upgrade).
    Reset,
}

fn parse_change_type(s: &str) -> Result<ChangeType, String> {
    s.parse()
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            std::fs::create_dir_all(&cfg.corpus.root).with_context(|| {
                format!(
                    "failed to create corpus directory {}",
                    cfg.corpus.root.display()
                )
            })?;
            println!("Database initialized successfully.");
            println!("  cache: {}", cfg.db.path.display());
            println!("  corpus: {}", cfg.corpus.root.display());
        }
        Commands::Index { json } => {
            retrieve_cmd::run_index(&cfg, json).await?;
        }
        Commands::Retrieve {
            text,
            change_type,
            top_k,
            json,
        } => {
            retrieve_cmd::run_retrieve(&cfg, &text, change_type, top_k, json).await?;
        }
        Commands::Cache { action } => match action {
            CacheAction::Stats { json } => stats::run_cache_stats(&cfg, json).await?,
            CacheAction::Reset => stats::run_cache_reset(&cfg).await?,
        },
    }

    Ok(())
}
