use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use code_context::config::Config;
use code_context::embed::provider;
use code_context::error::IndexError;
use code_context::indexer::{IndexStats, Indexer};
use code_context::search::{SearchFilters, SearchResponse, SearchStatus};

/// code-context - semantic codebase indexing and retrieval
#[derive(Parser, Debug)]
#[command(name = "code-context")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Index directory (overrides config file)
    #[arg(long, value_name = "DIR", global = true)]
    index_dir: Option<PathBuf>,

    /// Embedding provider: "hashed" or "openai" (overrides config file)
    #[arg(long, value_name = "NAME", global = true)]
    provider: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the index for a project directory
    Index {
        /// Project root to index
        #[arg(default_value = ".")]
        root: PathBuf,

        /// Discard the existing index and rebuild from scratch
        #[arg(long)]
        force: bool,
    },

    /// Incrementally re-index changed, added, and deleted files
    Update {
        /// Project root to reconcile against
        #[arg(default_value = ".")]
        root: PathBuf,
    },

    /// Search the index with a natural-language query
    Search {
        /// Query text
        query: String,

        /// Maximum number of results
        #[arg(short = 'k', long, default_value_t = 10)]
        limit: usize,

        /// Restrict to file extensions (repeatable, e.g. --ext py --ext rs)
        #[arg(long = "ext", value_name = "EXT")]
        extensions: Vec<String>,

        /// Restrict to paths matching this glob
        #[arg(long = "path", value_name = "GLOB")]
        path_glob: Option<String>,

        /// Drop results scoring below this threshold (0.0 - 1.0)
        #[arg(long, value_name = "SCORE")]
        min_score: Option<f32>,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Find chunks similar to an already-indexed file
    Similar {
        /// Path of the file (relative to the indexed root)
        file: String,

        /// Maximum number of results
        #[arg(short = 'k', long, default_value_t = 10)]
        limit: usize,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Show index statistics
    Stats {
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Generate a template configuration file
    Init {
        /// Where to write the template
        #[arg(default_value = "code_context.toml")]
        path: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Compact human-readable listing
    Text,
    /// Machine-readable JSON
    Json,
    /// Markdown with fenced snippets, for pasting into assistant context
    Md,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins when set; otherwise -v selects debug over warn.
    let log_level = if args.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Command::Init { path } = &args.command {
        if path.exists() {
            eprintln!("Error: Config file already exists: {}", path.display());
            std::process::exit(1);
        }
        Config::write_template(path)?;
        println!("Generated config file: {}", path.display());
        return Ok(());
    }

    let config = load_config(&args)?;

    match args.command {
        Command::Index { root, force } => {
            let config = anchor_index_dir(config, &root);
            let mut indexer = open_indexer(config, force)?;
            let stats = indexer.index(&root, force)?;
            indexer.persist()?;
            report_run(&stats);
        }
        Command::Update { root } => {
            let config = anchor_index_dir(config, &root);
            let mut indexer = open_indexer(config, false)?;
            let stats = indexer.update(&root)?;
            indexer.persist()?;
            report_run(&stats);
        }
        Command::Search {
            query,
            limit,
            extensions,
            path_glob,
            min_score,
            format,
        } => {
            let indexer = open_indexer(config, false)?;
            let filters = SearchFilters {
                extensions,
                path_glob,
                min_score,
            };
            let response = indexer.search(&query, limit, &filters)?;
            render_response(&response, format)?;
        }
        Command::Similar {
            file,
            limit,
            format,
        } => {
            let indexer = open_indexer(config, false)?;
            let response = indexer.similar(&file, limit)?;
            render_response(&response, format)?;
        }
        Command::Stats { format } => {
            let indexer = open_indexer(config, false)?;
            let stats = indexer.stats();
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
                _ => {
                    println!("Model:          {} ({}d)", stats.model_id, stats.dimension);
                    println!("Files indexed:  {}", stats.file_count);
                    println!("Chunks indexed: {}", stats.chunk_count);
                    println!("Size on disk:   {} bytes", stats.index_size_on_disk);
                }
            }
        }
        Command::Init { .. } => unreachable!("handled before config loading"),
    }

    Ok(())
}

/// Explicit --config wins, then the default search locations, then defaults.
fn load_config(args: &Args) -> Result<Config> {
    let config = if let Some(path) = &args.config {
        Config::from_file(path)?
    } else if let Some((config, path)) = Config::from_default_locations()? {
        info!(path = %path.display(), "Loaded configuration");
        config
    } else {
        Config::default()
    };
    Ok(config.with_overrides(args.index_dir.clone(), args.provider.clone()))
}

/// A relative index directory lives inside the project being indexed, so
/// `code-context index ~/proj` keeps its data under `~/proj/.code_context`.
fn anchor_index_dir(mut config: Config, root: &std::path::Path) -> Config {
    if config.indexer.index_dir.is_relative() {
        config.indexer.index_dir = root.join(&config.indexer.index_dir);
    }
    config
}

/// Open the index, falling back to an empty store when a forced rebuild
/// hits a corrupt snapshot or an embedding-model change.
fn open_indexer(config: Config, force: bool) -> Result<Indexer> {
    let provider = provider::from_config(&config.embedding)?;
    match Indexer::open(config.clone(), provider) {
        Ok(indexer) => Ok(indexer),
        Err(IndexError::Corrupt { path, reason }) if force => {
            warn!(path = %path.display(), reason = %reason, "Corrupt index snapshot, rebuilding");
            let provider = provider::from_config(&config.embedding)?;
            Ok(Indexer::open_empty(config, provider)?)
        }
        Err(IndexError::ModelMismatch {
            index_model,
            configured,
        }) if force => {
            warn!(
                old_model = %index_model,
                new_model = %configured,
                "Embedding model changed, rebuilding index"
            );
            let provider = provider::from_config(&config.embedding)?;
            Ok(Indexer::open_empty(config, provider)?)
        }
        Err(IndexError::Corrupt { path, reason }) => Err(anyhow::anyhow!(
            "index snapshot at {} is corrupt ({reason}); run `code-context index --force` to rebuild",
            path.display()
        )),
        Err(IndexError::ModelMismatch {
            index_model,
            configured,
        }) => Err(anyhow::anyhow!(
            "index was built with model {index_model} but {configured} is configured; \
             run `code-context index --force` to rebuild"
        )),
        Err(error) => Err(error).context("failed to open index"),
    }
}

fn report_run(stats: &IndexStats) {
    println!(
        "Scanned {} files: +{} chunks, -{} chunks",
        stats.files_scanned, stats.chunks_added, stats.chunks_removed
    );
    for error in &stats.errors {
        eprintln!("  skipped {}: {}", error.path, error.message);
    }
}

fn render_response(response: &SearchResponse, format: OutputFormat) -> Result<()> {
    if response.status == SearchStatus::NoIndex {
        eprintln!("No index found. Run `code-context index` first.");
        std::process::exit(1);
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(response)?),
        OutputFormat::Text => {
            if response.results.is_empty() {
                println!("No results.");
            }
            for result in &response.results {
                println!(
                    "{:>2}. {}:{}-{}  (score {:.3})",
                    result.rank,
                    result.chunk.file_path,
                    result.chunk.start_line,
                    result.chunk.end_line,
                    result.score
                );
                for line in result.chunk.text.lines().take(3) {
                    println!("      {line}");
                }
            }
        }
        OutputFormat::Md => {
            if response.results.is_empty() {
                println!("No relevant code found.");
            }
            for result in &response.results {
                println!(
                    "## {} (lines {}-{}, score {:.2})\n",
                    result.chunk.file_path,
                    result.chunk.start_line,
                    result.chunk.end_line,
                    result.score
                );
                println!("```{}", result.chunk.language);
                println!("{}", result.chunk.text);
                println!("```\n");
            }
        }
    }
    Ok(())
}
