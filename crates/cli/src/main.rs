use anyhow::{Context as AnyhowContext, Result};
use clap::{Args, Parser, Subcommand};
use kb_retrieval::{RetrievalConfig, RetrieveRequest};
use kb_vector_store::{config_path, default_data_dir};
use std::path::PathBuf;
use std::time::Duration;

use crate::commands::App;
use crate::config::{CliConfig, DEFAULT_NAMESPACE};
use crate::flags::{Bm25ScopeFlag, ProviderMode};

mod commands;
mod config;
mod flags;
mod providers;

#[derive(Parser)]
#[command(name = "kb")]
#[command(about = "Hybrid semantic + keyword retrieval over chunked documents", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout is reserved for JSON)
    #[arg(long, global = true)]
    quiet: bool,

    /// Data directory holding the snapshot and manifest (overrides KB_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Config file (default: <data-dir>/kb.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the provider backend in this process
    #[arg(long, global = true, value_enum)]
    provider: Option<ProviderMode>,

    /// Corpus used for BM25 statistics
    #[arg(long, global = true, value_enum, default_value = "store")]
    bm25_scope: Bm25ScopeFlag,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,

    /// Abort provider-backed commands after this many seconds
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed a chunked document and add it to the store
    Ingest(IngestArgs),

    /// Retrieve stitched context and sources for a query
    Query(RetrieveArgs),

    /// Retrieve context and answer the question from it
    Answer(RetrieveArgs),

    /// List ingested documents
    Docs(DocsArgs),

    /// Delete documents and their chunks
    Delete(DeleteArgs),

    /// Remove all records of a namespace, or everything
    Clear(ClearArgs),

    /// Show store statistics
    Info,
}

#[derive(Args)]
pub(crate) struct IngestArgs {
    /// JSON array of `{id, text, page}` chunks ("-" reads stdin)
    pub chunks: PathBuf,

    /// Document id; record ids become `<doc-id>:<chunk-id>`
    #[arg(long)]
    pub doc_id: String,

    /// Namespace for the document's records
    #[arg(long, default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Display name stored in the manifest (default: chunks file name)
    #[arg(long)]
    pub original_name: Option<String>,

    /// Drop the document's previous chunks first
    #[arg(long)]
    pub replace: bool,
}

#[derive(Args)]
pub(crate) struct RetrieveArgs {
    /// Question or search query
    pub query: String,

    /// Restrict to these document ids (repeatable)
    #[arg(long = "doc-id")]
    pub doc_ids: Vec<String>,

    /// Restrict to the most recently ingested document of the namespace
    #[arg(long, conflicts_with = "doc_ids")]
    pub latest: bool,

    /// Namespace to search (default: config value, else "pdf")
    #[arg(long, conflicts_with = "any_namespace")]
    pub namespace: Option<String>,

    /// Search every namespace
    #[arg(long)]
    pub any_namespace: bool,

    /// Number of results to keep
    #[arg(long)]
    pub top_k: Option<usize>,

    /// Weight of the semantic score (0 = keywords only, 1 = embeddings only)
    #[arg(long)]
    pub alpha: Option<f32>,

    /// Search with the query as given, without LLM rephrasings
    #[arg(long)]
    pub no_expansion: bool,

    /// Number of query variants, including the original
    #[arg(long)]
    pub variants: Option<usize>,

    /// Character budget for the stitched context
    #[arg(long)]
    pub max_context_chars: Option<usize>,

    /// Include per-hit scores and query variants in the output
    #[arg(long)]
    pub debug: bool,

    /// Do not retry with wider settings when nothing is found
    #[arg(long)]
    pub no_broaden: bool,
}

impl RetrieveArgs {
    pub(crate) fn to_request(&self, config: &RetrievalConfig) -> Result<RetrieveRequest> {
        let mut request = RetrieveRequest::from_config(&self.query, config).debug(self.debug);
        request.namespace = if self.any_namespace {
            None
        } else {
            self.namespace
                .clone()
                .or_else(|| config.namespace.clone())
                .or_else(|| Some(DEFAULT_NAMESPACE.to_string()))
        };
        if !self.doc_ids.is_empty() {
            request = request.doc_ids(self.doc_ids.iter().cloned());
        }
        if let Some(top_k) = self.top_k {
            anyhow::ensure!(top_k > 0, "--top-k must be positive");
            request = request.top_k(top_k);
        }
        if let Some(alpha) = self.alpha {
            anyhow::ensure!(
                (0.0..=1.0).contains(&alpha),
                "--alpha must be within [0, 1], got {alpha}"
            );
            request = request.alpha(alpha);
        }
        if self.no_expansion {
            request = request.expansion(false);
        }
        if let Some(variants) = self.variants {
            request = request.variant_count(variants);
        }
        if let Some(max) = self.max_context_chars {
            request = request.max_context_chars(max);
        }
        Ok(request)
    }
}

#[derive(Args)]
pub(crate) struct DocsArgs {
    /// Only documents of this namespace
    #[arg(long)]
    pub namespace: Option<String>,
}

#[derive(Args)]
pub(crate) struct DeleteArgs {
    /// Document ids to delete
    #[arg(required = true)]
    pub doc_ids: Vec<String>,
}

#[derive(Args)]
pub(crate) struct ClearArgs {
    /// Namespace to clear
    #[arg(long, conflicts_with = "all")]
    pub namespace: Option<String>,

    /// Clear every namespace
    #[arg(long)]
    pub all: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    // reqwest/hyper are noisy at debug level
    if !cli.verbose {
        builder.filter_module("hyper", log::LevelFilter::Warn);
        builder.filter_module("reqwest", log::LevelFilter::Warn);
    }
    builder.target(env_logger::Target::Stderr).init();

    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    let mut config = CliConfig::load(cli.config.as_deref(), &config_path(&data_dir))
        .context("Failed to load configuration")?;
    if let Some(mode) = cli.provider {
        config.provider.mode = mode;
    }
    log::debug!(
        "Data dir {}, provider {}",
        data_dir.display(),
        config.provider.mode.as_str()
    );

    let app = App {
        data_dir,
        config,
        bm25_scope: cli.bm25_scope.as_domain(),
        pretty: cli.pretty,
        timeout: cli.timeout_secs.map(Duration::from_secs),
    };

    match cli.command {
        Commands::Ingest(args) => app.ingest(args).await,
        Commands::Query(args) => app.query(args).await,
        Commands::Answer(args) => app.answer(args).await,
        Commands::Docs(args) => app.docs(args),
        Commands::Delete(args) => app.delete(args),
        Commands::Clear(args) => app.clear(args),
        Commands::Info => app.info(),
    }
}
