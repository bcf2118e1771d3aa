//! # Code RAG CLI (`coderag`)
//!
//! Turns a GitHub repository into an indexed, searchable vector collection.
//!
//! ## Usage
//!
//! ```bash
//! coderag --config ./config/coderag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `coderag walk` | Traverse the repository and print its graph and files |
//! | `coderag build` | Print the metadata-enriched document for each file |
//! | `coderag extract` | Split documents into nodes and run title/question extraction |
//! | `coderag ingest` | Full pipeline into the vector store |
//! | `coderag collections <action>` | list, exists, create, drop, stats, count |
//! | `coderag search "<query>"` | Similarity search with optional filter and rerank |
//! | `coderag completions <shell>` | Print a shell completion script |
//!
//! ## Examples
//!
//! ```bash
//! # Inspect what would be indexed
//! coderag walk --config ./config/coderag.toml
//!
//! # Index the first 20 files
//! coderag ingest --limit 20
//!
//! # Search only Rust files and rerank
//! coderag search "retry with backoff" --filter 'extension == ".rs"' --rerank
//! ```

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use code_rag::search::SearchOptions;
use code_rag::{collections, config, ingest, search};

/// Code RAG: index a GitHub repository into a vector database for
/// retrieval-augmented generation.
///
/// All commands except `completions` read a TOML configuration file. See
/// `config/coderag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "coderag",
    about = "Code RAG: index a GitHub repository into a vector database",
    version,
    long_about = "Code RAG walks a GitHub repository through the contents API, turns each file \
    into a metadata-enriched document, splits and annotates it with LLM-generated titles and \
    questions, embeds the chunks and stores them in Milvus for similarity search."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/coderag.toml")]
    config: PathBuf,

    /// Enable debug logging. `RUST_LOG` takes precedence when set.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Traverse the repository.
    ///
    /// Prints the nested directory graph, one line per fetched file, and the
    /// manifest of entries that could not be fetched or decoded.
    Walk {
        /// Emit a single JSON object instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Print the rendered document for each file.
    Build {
        /// Maximum number of files to process.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Split documents into nodes and run the metadata extractors.
    Extract {
        /// Maximum number of files to process.
        #[arg(long)]
        limit: Option<usize>,

        /// Emit nodes and failures as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Walk, build, extract, embed and store.
    Ingest {
        /// Maximum number of files to process.
        #[arg(long)]
        limit: Option<usize>,

        /// Stop before embedding; print counts only.
        #[arg(long)]
        dry_run: bool,

        /// Drop and recreate the collection first.
        #[arg(long)]
        recreate: bool,
    },

    /// Manage vector collections.
    Collections {
        #[command(subcommand)]
        action: CollectionsAction,
    },

    /// Search the configured collection.
    Search {
        /// Natural-language query.
        query: String,

        /// Number of results.
        #[arg(long, short = 'k', default_value_t = 5)]
        top_k: usize,

        /// Boolean filter expression, e.g. `extension == ".rs"`.
        #[arg(long)]
        filter: Option<String>,

        /// Reorder results with the configured reranker.
        #[arg(long)]
        rerank: bool,

        /// IVF probe count passed through as a search param.
        #[arg(long, default_value_t = 10)]
        nprobe: usize,

        /// Emit results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print a shell completion script to stdout.
    Completions {
        shell: Shell,
    },
}

/// Each action defaults to `[vectordb].collection` when no name is given.
#[derive(Subcommand)]
enum CollectionsAction {
    /// List collection names.
    List,
    /// Report whether a collection exists.
    Exists { name: Option<String> },
    /// Create a document collection and index its vector field.
    Create {
        name: Option<String>,
        /// Vector dimensionality; defaults to `[embedding].dims`.
        #[arg(long)]
        dims: Option<usize>,
    },
    /// Drop a collection and all its data.
    Drop {
        name: Option<String>,
        /// Confirm the drop.
        #[arg(long)]
        yes: bool,
    },
    /// Show schema and row count.
    Stats { name: Option<String> },
    /// Print the number of stored vectors.
    Count { name: Option<String> },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "coderag", &mut std::io::stdout());
        return Ok(());
    }

    init_tracing(cli.verbose);
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Walk { json } => {
            ingest::run_walk(&cfg, json).await?;
        }
        Commands::Build { limit } => {
            ingest::run_build(&cfg, limit).await?;
        }
        Commands::Extract { limit, json } => {
            ingest::run_extract(&cfg, limit, json).await?;
        }
        Commands::Ingest {
            limit,
            dry_run,
            recreate,
        } => {
            ingest::run_ingest(&cfg, limit, dry_run, recreate).await?;
        }
        Commands::Collections { action } => match action {
            CollectionsAction::List => collections::run_list(&cfg).await?,
            CollectionsAction::Exists { name } => {
                collections::run_exists(&cfg, name.as_deref()).await?
            }
            CollectionsAction::Create { name, dims } => {
                collections::run_create(&cfg, name.as_deref(), dims).await?
            }
            CollectionsAction::Drop { name, yes } => {
                collections::run_drop(&cfg, name.as_deref(), yes).await?
            }
            CollectionsAction::Stats { name } => {
                collections::run_stats(&cfg, name.as_deref()).await?
            }
            CollectionsAction::Count { name } => {
                collections::run_count(&cfg, name.as_deref()).await?
            }
        },
        Commands::Search {
            query,
            top_k,
            filter,
            rerank,
            nprobe,
            json,
        } => {
            let options = SearchOptions {
                top_k,
                filter,
                rerank,
                nprobe,
            };
            search::run_search(&cfg, &query, &options, json).await?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}
