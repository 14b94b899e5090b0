use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use mneme::config::MnemeConfig;
use mneme::query::types::QueryMode;
use mneme::{cli, server};

#[derive(Parser)]
#[command(name = "mneme", version, about = "Unified query orchestrator for knowledge stores")]
struct Cli {
    /// Config file (defaults to ~/.mneme/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP API (MCP over Streamable HTTP at /mcp)
    Serve,
    /// Start the MCP server (stdio transport)
    Mcp,
    /// Probe every enabled adapter and print a health report
    Check,
    /// Run one query and print the ranked results
    Search {
        query: String,
        #[arg(long, default_value = "smart")]
        mode: QueryMode,
        /// Source id to consult; repeat for several
        #[arg(long = "source")]
        sources: Vec<String>,
        #[arg(long, default_value_t = 10)]
        max_results: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => MnemeConfig::load_from(path)?,
        None => MnemeConfig::load()?,
    };

    // Log to stderr so stdout stays clean for MCP JSON-RPC.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve => server::serve_http(config).await?,
        Command::Mcp => server::serve_stdio(config).await?,
        Command::Check => {
            if !cli::check(&config).await? {
                std::process::exit(1);
            }
        }
        Command::Search {
            query,
            mode,
            sources,
            max_results,
        } => cli::search(&config, &query, mode, sources, max_results).await?,
    }

    Ok(())
}
