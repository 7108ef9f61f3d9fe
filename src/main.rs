//! # docqa CLI
//!
//! ```bash
//! docqa [--config ./config/docqa.toml] [--quiet] <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa query "<question>"` | Answer a question from the documentation |
//! | `docqa rebuild` | Rebuild the index from scratch now |
//! | `docqa status` | Show the persisted index and whether it is stale |
//!
//! Logs go to stderr; `DOCQA_LOG` overrides the level (e.g. `DOCQA_LOG=debug`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use docqa::config;
use docqa::index_cmd;
use docqa::query::{self, ReportOptions};

/// docqa: ask questions about a folder of internal documentation.
#[derive(Parser)]
#[command(
    name = "docqa",
    about = "Retrieval-augmented question answering over local documentation",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/docqa.toml` when present, otherwise built-in
    /// defaults. An explicitly given path must exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Only log warnings and errors.
    #[arg(long, short, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question from the indexed documentation.
    ///
    /// Loads the persisted index, rebuilding it first if it is missing,
    /// corrupt, or out of date with the documents or configuration.
    Query {
        /// The question to answer.
        question: String,

        /// Number of passages to retrieve (overrides `retrieval.top_k`).
        #[arg(long)]
        top_k: Option<usize>,

        /// Show token ranges and previews of the retrieved passages.
        #[arg(long, short)]
        verbose: bool,

        /// Don't list the source passages.
        #[arg(long)]
        no_sources: bool,

        /// Rebuild the index before answering.
        #[arg(long)]
        rebuild: bool,
    },

    /// Rebuild the index from the document directory.
    Rebuild,

    /// Show the persisted index and whether it is stale.
    Status {
        /// Print the status as JSON.
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(verbose: bool, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCQA_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let verbose = matches!(cli.command, Commands::Query { verbose: true, .. });
    init_tracing(verbose, cli.quiet);

    let cfg = config::resolve_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Query {
            question,
            top_k,
            verbose,
            no_sources,
            rebuild,
        } => {
            query::run_query(
                &cfg,
                &question,
                top_k,
                rebuild,
                ReportOptions {
                    show_sources: !no_sources,
                    verbose,
                },
            )
            .await?;
        }
        Commands::Rebuild => {
            index_cmd::run_rebuild(&cfg).await?;
        }
        Commands::Status { json } => {
            index_cmd::run_status(&cfg, json).await?;
        }
    }

    Ok(())
}
