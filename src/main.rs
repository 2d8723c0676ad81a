//! # LifeVault CLI (`lifevault`)
//!
//! The `lifevault` binary indexes one folder and answers natural-language
//! queries over it.
//!
//! ## Usage
//!
//! ```bash
//! lifevault --config ./config/lifevault.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lifevault init` | Create the SQLite database and run schema migrations |
//! | `lifevault scan` | Reconcile the index with the folder once |
//! | `lifevault watch` | Scan, then follow changes until Ctrl-C |
//! | `lifevault search "<query>"` | Ranked file references for a query |
//! | `lifevault ingest <path>` | Re-index one file now |
//! | `lifevault stats` | Counts by type, state, and modality |
//! | `lifevault list` | Every tracked file, newest first |
//! | `lifevault surprise` | One random indexed file |

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use lifevault::config;
use lifevault::models::{FileType, SearchFilters};
use lifevault::stats;
use lifevault::vault::Vault;

/// LifeVault: semantic search over your own files.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/lifevault.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "lifevault",
    about = "LifeVault: a local semantic index over a folder of photos and documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/lifevault.toml")]
    config: PathBuf,

    /// Debug-level logging (RUST_LOG overrides).
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Output format.
    #[arg(long, global = true, value_enum, default_value_t = Format::Text)]
    format: Format,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum TypeFilter {
    All,
    Images,
    Documents,
}

impl TypeFilter {
    fn file_types(self) -> Vec<FileType> {
        match self {
            TypeFilter::All => Vec::new(),
            TypeFilter::Images => vec![FileType::Image],
            TypeFilter::Documents => vec![FileType::Document, FileType::Text],
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it against an existing database is safe.
    Init,

    /// Walk the folder once and bring the index up to date.
    ///
    /// Unchanged files are skipped by content hash; records of files that
    /// no longer exist are removed.
    Scan,

    /// Scan, then watch the folder and index changes until interrupted.
    Watch,

    /// Search indexed files.
    Search {
        /// The search query.
        query: String,

        /// Maximum number of results.
        #[arg(long, short)]
        k: Option<usize>,

        /// Restrict results to a file category.
        #[arg(long = "type", value_enum, default_value_t = TypeFilter::All)]
        file_type: TypeFilter,
    },

    /// Re-index one file immediately, even if unchanged.
    Ingest {
        path: PathBuf,
    },

    /// Show index statistics.
    Stats,

    /// List every tracked file.
    List,

    /// Show one random indexed file.
    Surprise,
}

fn init_logging(verbose: bool) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if verbose {
        EnvFilter::new("lifevault=debug,info")
    } else {
        EnvFilter::new("warn,lifevault=info")
    };
    // logs go to stderr so --format json stays parseable
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn emit<T: Serialize>(format: Format, value: &T, text: impl FnOnce(&T) -> String) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(value)?),
        Format::Text => print!("{}", text(value)),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    if let Commands::Init = cli.command {
        let index = lifevault::index::VectorIndex::open(&cfg.db.path).await?;
        index.close().await;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let vault = Vault::open(cfg).await?;

    match cli.command {
        Commands::Init => {}
        Commands::Scan => {
            let report = vault.scan_now().await?;
            emit(cli.format, &report, |r| {
                format!(
                    "Scanned {} files: {} indexed, {} unchanged, {} unsupported, {} failed, {} removed, {} errors\n",
                    r.scanned, r.indexed, r.unchanged, r.unsupported, r.failed, r.removed, r.errors
                )
            })?;
        }
        Commands::Watch => {
            println!(
                "Watching {} (Ctrl-C to stop)",
                vault.pipeline().filter().root().display()
            );
            vault
                .run(async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await?;
        }
        Commands::Search {
            query,
            k,
            file_type,
        } => {
            let filters = SearchFilters {
                file_types: file_type.file_types(),
                ..Default::default()
            };
            let response = vault.search(&query, k, filters).await;
            emit(cli.format, &response, stats::render_search)?;
        }
        Commands::Ingest { path } => {
            let outcome = vault.ingest(&path).await?;
            println!("{}: {:?}", path.display(), outcome);
        }
        Commands::Stats => {
            let s = vault.stats().await?;
            let db_path = vault.config().db.path.clone();
            emit(cli.format, &s, |s| stats::render_stats(s, &db_path))?;
        }
        Commands::List => {
            let records = vault.list_all().await?;
            emit(cli.format, &records, |r| stats::render_records(r))?;
        }
        Commands::Surprise => match vault.surprise().await? {
            Some(record) => emit(cli.format, &record, |r| {
                stats::render_records(std::slice::from_ref(r))
            })?,
            None => println!("Nothing indexed yet."),
        },
    }

    vault.close().await;
    Ok(())
}
