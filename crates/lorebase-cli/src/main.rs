//! Lorebase CLI
//!
//! Thin command-line surface over lorebase-core: index building, embedding,
//! queue management, search, and frontmatter repair.
//!
//! Exit codes: 0 success, 1 configuration error (unknown KB, embeddings
//! unavailable), 2 data error (empty index where one is required).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lorebase_core::repair::RepairError;
use lorebase_core::{
    repair, Config, IndexError, IndexManager, SearchMode, SearchRequest, SearchService, Store,
    StoreError,
};

/// Lorebase - local knowledge-base search engine
#[derive(Parser)]
#[command(name = "lorebase")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Index and search Markdown knowledge bases")]
struct Cli {
    /// Config file path (default: ./lorebase.yaml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search index management
    #[command(subcommand)]
    Index(IndexCommands),

    /// Embedding queue management
    #[command(subcommand)]
    Queue(QueueCommands),

    /// Search across entries
    Search {
        /// Search query
        query: String,
        /// Restrict to one KB
        #[arg(long)]
        kb: Option<String>,
        /// Filter by entry type
        #[arg(long = "type")]
        entry_type: Option<String>,
        /// Filter by tag (repeatable, AND-joined)
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Filter from date (YYYY-MM-DD, inclusive)
        #[arg(long)]
        from: Option<String>,
        /// Filter to date (YYYY-MM-DD, inclusive)
        #[arg(long)]
        to: Option<String>,
        /// Max results
        #[arg(long, default_value = "20")]
        limit: i64,
        /// Pagination offset
        #[arg(long, default_value = "0")]
        offset: i64,
        /// Search mode: keyword, semantic, or hybrid
        #[arg(long)]
        mode: Option<String>,
        /// Expand the query with AI-generated terms
        #[arg(long)]
        expand: bool,
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// One-shot frontmatter repair passes
    #[command(subcommand)]
    Repair(RepairCommands),
}

#[derive(Subcommand)]
enum IndexCommands {
    /// Build or rebuild the search index
    Build {
        /// KB to index (all if omitted)
        kb_name: Option<String>,
    },
    /// Generate vector embeddings for semantic search
    Embed {
        /// KB to embed (all if omitted)
        kb_name: Option<String>,
        /// Re-embed entries that already have vectors
        #[arg(long, short)]
        force: bool,
    },
    /// Show index statistics
    Stats,
}

#[derive(Subcommand)]
enum QueueCommands {
    /// Show embedding queue status
    Status,
    /// Process pending queue entries
    Run {
        /// Rows per batch
        #[arg(long, default_value = "10")]
        batch_size: i64,
    },
    /// Return quarantined entries to pending
    ResetFailed,
}

#[derive(Subcommand)]
enum RepairCommands {
    /// Add id: <stem> to files lacking one
    InjectIds { path: PathBuf },
    /// Strip folder prefixes from wikilinks
    Wikilinks { path: PathBuf },
    /// Normalize research-KB frontmatter keys and values
    Research { path: PathBuf },
    /// Normalize timeline-KB frontmatter
    Timeline { path: PathBuf },
}

/// Errors mapped to exit codes.
enum CliError {
    /// Exit 1: configuration problems (unknown KB, missing capability)
    Config(String),
    /// Exit 2: data problems (empty index where one is required)
    Data(String),
    Other(anyhow::Error),
}

impl CliError {
    fn code(&self) -> ExitCode {
        match self {
            CliError::Config(_) => ExitCode::from(1),
            CliError::Data(_) => ExitCode::from(2),
            CliError::Other(_) => ExitCode::from(1),
        }
    }

    fn message(&self) -> String {
        match self {
            CliError::Config(m) | CliError::Data(m) => m.clone(),
            CliError::Other(e) => format!("{e:#}"),
        }
    }
}

impl From<StoreError> for CliError {
    fn from(e: StoreError) -> Self {
        CliError::Other(e.into())
    }
}

impl From<RepairError> for CliError {
    fn from(e: RepairError) -> Self {
        CliError::Other(e.into())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::Other(e.into())
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e.message());
            e.code()
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<Config, CliError> {
    match path {
        Some(p) => {
            Config::load(p).map_err(|e| CliError::Config(format!("{}: {e}", p.display())))
        }
        None => {
            let default = PathBuf::from("lorebase.yaml");
            if default.exists() {
                Config::load(&default)
                    .map_err(|e| CliError::Config(format!("lorebase.yaml: {e}")))
            } else {
                Ok(Config::default())
            }
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = load_config(cli.config.as_ref())?;
    let store = Store::open(&config.settings.index_path)?;

    match cli.command {
        Commands::Index(command) => run_index(command, &config, &store),
        Commands::Queue(command) => run_queue(command, &config, &store),
        Commands::Search {
            query,
            kb,
            entry_type,
            tags,
            from,
            to,
            limit,
            offset,
            mode,
            expand,
            json,
        } => {
            let service = SearchService::with_settings(&store, &config.settings);
            let request = SearchRequest {
                query,
                kb_name: kb,
                entry_type,
                tags,
                date_from: from,
                date_to: to,
                limit,
                offset,
                mode: mode.as_deref().map(SearchMode::parse),
                expand,
            };
            let hits = service.search(&request)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else if hits.is_empty() {
                println!("No results.");
            } else {
                for hit in &hits {
                    let date = hit.date.as_deref().unwrap_or("-");
                    println!("{}/{}  [{}]  {}", hit.kb_name, hit.id, date, hit.title);
                    if !hit.snippet.is_empty() {
                        println!("    {}", hit.snippet.replace('\n', " "));
                    }
                }
            }
            Ok(())
        }
        Commands::Repair(command) => run_repair(command),
    }
}

fn run_index(command: IndexCommands, config: &Config, store: &Store) -> Result<(), CliError> {
    match command {
        IndexCommands::Build { kb_name } => {
            let indexer = IndexManager::new(store, config);
            let count = match kb_name {
                Some(name) => indexer.index_kb(&name, None).map_err(index_error)?,
                None => {
                    if config.knowledge_bases.is_empty() {
                        println!("No knowledge bases configured.");
                        return Ok(());
                    }
                    indexer.index_all(None).map_err(index_error)?
                }
            };
            println!("Indexed {count} entries.");
            Ok(())
        }
        IndexCommands::Embed { kb_name, force } => run_embed(config, store, kb_name, force),
        IndexCommands::Stats => {
            let stats = store.stats()?;
            println!("Total entries: {}", stats.total_entries);
            println!("Total tags:    {}", stats.total_tags);
            println!("Total links:   {}", stats.total_links);
            for (kb, count) in &stats.kbs {
                println!("  {kb}: {count}");
            }
            Ok(())
        }
    }
}

#[cfg(feature = "embeddings")]
fn run_embed(
    config: &Config,
    store: &Store,
    kb_name: Option<String>,
    force: bool,
) -> Result<(), CliError> {
    use lorebase_core::EmbeddingService;

    if !store.vec_enabled() {
        return Err(CliError::Config(
            "sqlite-vec failed to load; vector search is unavailable".into(),
        ));
    }
    if store.entry_count(None)? == 0 {
        return Err(CliError::Data(
            "Index is empty. Run 'lorebase index build' first.".into(),
        ));
    }

    let service = EmbeddingService::with_model(store, &config.settings.embedding_model);
    if !service.is_ready() {
        return Err(CliError::Config(
            "Embedding model unavailable (download failed or ONNX runtime missing)".into(),
        ));
    }

    let report = service
        .embed_all(kb_name.as_deref(), force, None)
        .map_err(|e| CliError::Other(e.into()))?;
    println!("Embedded: {}", report.embedded);
    println!("Skipped:  {}", report.skipped);
    if report.errors > 0 {
        println!("Errors:   {}", report.errors);
    }
    Ok(())
}

#[cfg(not(feature = "embeddings"))]
fn run_embed(
    _config: &Config,
    _store: &Store,
    _kb_name: Option<String>,
    _force: bool,
) -> Result<(), CliError> {
    Err(CliError::Config(
        "This build has no embedding support (feature 'embeddings' disabled)".into(),
    ))
}

fn run_queue(command: QueueCommands, config: &Config, store: &Store) -> Result<(), CliError> {
    match command {
        QueueCommands::Status => {
            let status = store.queue_counts()?;
            println!("Pending: {}", status.pending);
            println!("Failed:  {}", status.failed);
            println!("Total:   {}", status.total);
            Ok(())
        }
        QueueCommands::Run { batch_size } => run_queue_batch(config, store, batch_size),
        QueueCommands::ResetFailed => {
            let count = store.queue_reset_failed()?;
            println!("Reset {count} entries to pending.");
            Ok(())
        }
    }
}

#[cfg(feature = "embeddings")]
fn run_queue_batch(config: &Config, store: &Store, batch_size: i64) -> Result<(), CliError> {
    use lorebase_core::{EmbeddingService, EmbeddingWorker};

    let service = EmbeddingService::with_model(store, &config.settings.embedding_model);
    let worker = EmbeddingWorker::new(store, &service);
    let processed = worker.process_batch(batch_size)?;
    let status = worker.get_status()?;
    println!(
        "Processed {processed}; {} pending, {} failed.",
        status.pending, status.failed
    );
    Ok(())
}

#[cfg(not(feature = "embeddings"))]
fn run_queue_batch(_config: &Config, _store: &Store, _batch_size: i64) -> Result<(), CliError> {
    Err(CliError::Config(
        "This build has no embedding support (feature 'embeddings' disabled)".into(),
    ))
}

fn run_repair(command: RepairCommands) -> Result<(), CliError> {
    match command {
        RepairCommands::InjectIds { path } => {
            let injected = repair::inject_ids(&path)?;
            println!("Injected ids into {} files.", injected.len());
            for (file, id) in &injected {
                println!("  {} -> id: {}", file.display(), id);
            }
        }
        RepairCommands::Wikilinks { path } => {
            let count = repair::normalize_wikilinks(&path)?;
            println!("Stripped {count} wikilink prefixes.");
        }
        RepairCommands::Research { path } => {
            let counts = repair::normalize_research_frontmatter(&path)?;
            println!("essay_type -> type:        {}", counts.essay_type_to_type);
            println!("event_date -> date:        {}", counts.event_date_to_date);
            println!("organization remapped:     {}", counts.org_to_cascade_org);
            println!("research_status normalized: {}", counts.research_status_normalized);
        }
        RepairCommands::Timeline { path } => {
            let counts = repair::normalize_timeline_frontmatter(&path)?;
            println!("type added:     {}", counts.type_added);
            println!("dates unquoted: {}", counts.date_unquoted);
        }
    }
    Ok(())
}

fn index_error(e: IndexError) -> CliError {
    match e {
        IndexError::KbNotFound(name) => CliError::Config(format!("KB '{name}' not found")),
        IndexError::KbReadOnly(name) => CliError::Config(format!("KB '{name}' is read-only")),
        other => CliError::Other(other.into()),
    }
}
