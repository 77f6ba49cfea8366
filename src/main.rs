use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pagerag::app::AppContext;
use pagerag::config::Config;
use pagerag::embedder::download::download_model_files;
use pagerag::mcp::McpServer;
use pagerag::page::build_client;
use pagerag::retrieval::Retriever;

#[derive(Parser, Debug)]
#[command(
    name = "pagerag",
    version,
    about = "Semantic search over a single web page"
)]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, global = true, default_value = "config.json")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve MCP tools over stdio (default).
    Mcp,

    /// Serve the HTTP API.
    Serve {
        /// Address to bind (host:port); overrides http.bind.
        #[arg(long)]
        bind: Option<String>,
    },

    /// Index a text file under a namespace.
    Index {
        #[arg(long)]
        namespace: String,

        #[arg(long)]
        file: PathBuf,
    },

    /// Query an indexed namespace.
    Query {
        #[arg(long)]
        namespace: String,

        query: String,

        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Fetch a page, index it, and query it.
    Search {
        #[arg(long)]
        url: String,

        query: String,

        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Download the embedding model files.
    DownloadModel,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout belongs to the MCP transport; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    config.validate().context("invalid configuration")?;

    match cli.command.unwrap_or(Command::Mcp) {
        Command::Mcp => {
            info!("Starting pagerag MCP server...");
            let ctx = app_context(&config).await?;
            McpServer::new(ctx).start().await?;
        }
        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.http.bind.clone());
            let ctx = app_context(&config).await?;
            pagerag::http::serve(ctx, &bind).await?;
        }
        Command::Index { namespace, file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let retriever = build_retriever(&config).await?;
            let report = tokio::task::spawn_blocking(move || retriever.index(&namespace, &text))
                .await
                .context("indexing task panicked")??;
            print_json(&report)?;
        }
        Command::Query {
            namespace,
            query,
            top_k,
        } => {
            let top_k = top_k.unwrap_or(config.search_top_k);
            let retriever = build_retriever(&config).await?;
            let results =
                tokio::task::spawn_blocking(move || retriever.query(&namespace, &query, top_k))
                    .await
                    .context("query task panicked")??;
            print_json(&results)?;
        }
        Command::Search { url, query, top_k } => {
            let ctx = app_context(&config).await?;
            let response = ctx.search_page(&url, &query, top_k).await?;
            print_json(&response)?;
        }
        Command::DownloadModel => {
            let dir = config.model_dir();
            tokio::task::spawn_blocking(move || download_model_files(&dir))
                .await
                .context("download task panicked")??;
        }
    }

    Ok(())
}

/// Model loading and downloads block, so they run off the async workers.
async fn build_retriever(config: &Config) -> Result<Arc<Retriever>> {
    let config = config.clone();
    let retriever = tokio::task::spawn_blocking(move || config.build_retriever())
        .await
        .context("startup task panicked")??;
    Ok(Arc::new(retriever))
}

async fn app_context(config: &Config) -> Result<AppContext> {
    let retriever = build_retriever(config).await?;
    let client = build_client(config.fetch_timeout()).context("failed to build HTTP client")?;
    Ok(AppContext::new(retriever, client, config.search_top_k))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to encode output")?
    );
    Ok(())
}
