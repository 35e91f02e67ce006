//! # Learning Memory CLI (`lmem`)
//!
//! Stores learnings, replays failed writes, assembles task context, and
//! runs the maintenance tools (dimension migration, embedding backfill).
//!
//! ## Usage
//!
//! ```bash
//! lmem --config ./config/lmem.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lmem init` | Create the SQLite secondary and queue, and the primary schema if configured |
//! | `lmem store` | Store one learning through the write pipeline |
//! | `lmem drain` | Replay queued writes that failed on every backend |
//! | `lmem context` | Write learnings.md / knowledge-tree.json / meta.json for a task |
//! | `lmem extract` | Store a learning derived from an agent's output file |
//! | `lmem migrate-dimension` | Change the width of the primary's vector columns |
//! | `lmem backfill` | Embed primary records stored without a vector |
//!
//! Logs go to stderr; `--json` output on stdout is a single JSON document.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use learning_memory::agent_output::{self, ExtractRequest};
use learning_memory::context_bundle::{self, BundleRequest};
use learning_memory::{backfill, config, dimension, learn, migrate};
use learning_memory_core::models::{Confidence, LearningType, Scope, StoreRequest};

/// Learning Memory CLI: durable memory of what worked and what failed.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/lmem.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "lmem",
    about = "Learning Memory: a durable store of agent learnings with deduplication and fallback",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/lmem.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize storage.
    ///
    /// Creates the SQLite secondary and retry queue. When a primary DSN is
    /// configured, also creates the pgvector extension, the memory table
    /// and its HNSW index. Idempotent.
    Init,

    /// Store a learning.
    ///
    /// Runs the full pipeline: backend selection, embedding, duplicate
    /// check, persist with fallback. If every backend fails the learning
    /// is queued for `lmem drain`.
    Store {
        #[arg(long)]
        session_id: String,

        #[arg(long)]
        content: String,

        /// Learning type, e.g. `WORKING_SOLUTION` or `FAILED_APPROACH`.
        #[arg(long = "type")]
        learning_type: Option<LearningType>,

        /// What the learning relates to.
        #[arg(long)]
        context: Option<String>,

        /// Comma-separated tags.
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,

        /// `high`, `medium`, or `low`.
        #[arg(long)]
        confidence: Option<Confidence>,

        /// Project the learning belongs to. Sets the project id for
        /// PROJECT-scoped learnings.
        #[arg(long)]
        project_dir: Option<PathBuf>,

        /// Force `PROJECT` or `GLOBAL` instead of classifying.
        #[arg(long)]
        scope: Option<Scope>,

        #[arg(long)]
        json: bool,
    },

    /// Replay queued learnings.
    ///
    /// Processes up to `[queue].batch_limit` entries, oldest first. An entry
    /// is removed once it is stored on the primary; otherwise its retry
    /// count goes up. Entries at `[queue].max_retries` are left in place.
    Drain {
        #[arg(long)]
        json: bool,
    },

    /// Prepare context for a task.
    ///
    /// Recalls working solutions, failed approaches, and codebase patterns
    /// relevant to the task and writes them to the output directory.
    Context {
        #[arg(long)]
        task_description: String,

        #[arg(long, default_value = ".")]
        project_dir: PathBuf,

        #[arg(long, default_value = "./context")]
        output_dir: PathBuf,

        #[arg(long)]
        story_id: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Store a learning from an agent output file.
    ///
    /// `success` becomes a WORKING_SOLUTION and `failure` a FAILED_APPROACH.
    /// `blocked` tasks are skipped.
    Extract {
        /// Path to the agent's `agent-output.json`.
        #[arg(long)]
        output_file: PathBuf,

        #[arg(long)]
        story_id: String,

        #[arg(long)]
        task_description: String,

        #[arg(long)]
        project_dir: Option<PathBuf>,

        #[arg(long)]
        json: bool,
    },

    /// Change the width of the primary's vector columns.
    ///
    /// Existing vectors are truncated or zero-padded and the HNSW index is
    /// rebuilt. Not transactional: stop writers first.
    MigrateDimension {
        #[arg(long)]
        target_dim: usize,

        /// Report what would change without writing.
        #[arg(long)]
        dry_run: bool,

        /// Table to migrate; repeatable. Defaults to `[primary].vector_tables`.
        #[arg(long = "table")]
        tables: Vec<String>,

        #[arg(long)]
        json: bool,
    },

    /// Embed primary records that have no vector.
    Backfill {
        /// Re-embed every record, not just those missing a vector.
        #[arg(long)]
        force: bool,

        /// Maximum number of records to process.
        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    init_tracing(&cfg.log.level);

    let ok = match cli.command {
        Commands::Init => {
            let report = migrate::run_migrations(&cfg).await?;
            println!("Secondary store ready: {}", cfg.secondary.path.display());
            println!("Retry queue ready: {}", cfg.queue.path.display());
            match report.primary {
                None => println!("Primary: not configured"),
                Some(Ok(())) => println!("Primary: schema ready ({})", cfg.primary.table),
                Some(Err(e)) => println!("Primary: bootstrap failed: {}", e),
            }
            true
        }
        Commands::Store {
            session_id,
            content,
            learning_type,
            context,
            tags,
            confidence,
            project_dir,
            scope,
            json,
        } => {
            let mut request = StoreRequest::new(session_id, content).with_tags(
                tags.into_iter()
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty()),
            );
            request.options.learning_type = learning_type;
            request.options.context = context;
            request.options.confidence = confidence;
            request.options.project_dir = project_dir;
            request.options.scope = scope;
            learn::run_store(&cfg, &request, json).await?
        }
        Commands::Drain { json } => {
            learn::run_drain(&cfg, json).await?;
            true
        }
        Commands::Context {
            task_description,
            project_dir,
            output_dir,
            story_id,
            json,
        } => {
            let request = BundleRequest {
                task_description,
                project_dir,
                output_dir,
                story_id,
            };
            context_bundle::run_context(&cfg, &request, json).await?;
            true
        }
        Commands::Extract {
            output_file,
            story_id,
            task_description,
            project_dir,
            json,
        } => {
            let request = ExtractRequest {
                output_file,
                story_id,
                task_description,
                project_dir,
            };
            agent_output::run_extract(&cfg, &request, json).await?
        }
        Commands::MigrateDimension {
            target_dim,
            dry_run,
            tables,
            json,
        } => dimension::run_migrate_dimension(&cfg, target_dim, dry_run, &tables, json).await?,
        Commands::Backfill { force, limit, json } => {
            backfill::run_backfill(&cfg, force, limit, json).await?;
            true
        }
    };

    Ok(if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
