use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use strata::cli;
use strata::config::StrataConfig;

#[derive(Parser)]
#[command(name = "strata", version, about = "Local multi-tier memory engine for AI agents")]
struct Cli {
    /// Config file (default: ~/.strata/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also open the project root containing this directory
    #[arg(long, global = true)]
    project: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show memory counts, token usage and index health
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Bring the index in line with the documents on disk
    Sync {
        /// Rebuild every row instead of repairing drift
        #[arg(long)]
        reindex: bool,
    },
    /// Report drift between documents and index without changing anything
    Check,
    /// Run one lifecycle pass: expire, archive, promote, sync, embed
    Maintain,
    /// Hybrid search across all tiers
    Search {
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Print the context block for a query, or for a new session
    Context { query: Option<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => StrataConfig::load_from(path)?,
        None => StrataConfig::load()?,
    };

    // Log to stderr so stdout stays clean for command output.
    let filter = EnvFilter::try_new(&config.logging.level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let engine = cli::open_engine(config, cli.project).await?;

    let result = match cli.command {
        Command::Stats { json } => cli::stats::stats(&engine, json),
        Command::Sync { reindex } => cli::maintenance::sync(&engine, reindex),
        Command::Check => cli::maintenance::check(&engine),
        Command::Maintain => cli::maintenance::maintain(&engine).await,
        Command::Search { query, limit } => cli::search::search(&engine, &query, limit).await,
        Command::Context { query } => cli::search::context(&engine, query.as_deref()).await,
    };

    engine.shutdown().await?;
    result
}
