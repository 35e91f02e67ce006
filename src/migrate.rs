//! Schema bootstrap for every backend.
//!
//! All statements are idempotent; `lmem init` can run any number of times.

use anyhow::{bail, Result};
use sqlx::{PgPool, SqlitePool};

use crate::config::Config;
use crate::db;

/// Table holding memory records in the SQLite secondary.
pub const SECONDARY_TABLE: &str = "memories";

/// Table holding parked writes in the retry queue database.
pub const QUEUE_TABLE: &str = "failed_learnings";

/// HNSW build parameters shared by bootstrap and the dimension migration.
pub const HNSW_M: u32 = 16;
pub const HNSW_EF_CONSTRUCTION: u32 = 64;

/// Widest `vector` column pgvector can build an HNSW index over.
pub const HNSW_MAX_DIMENSIONS: usize = 2000;

/// Whether an HNSW index can be built over a `vector(dimension)` column.
pub fn check_indexable(dimension: usize) -> Result<()> {
    if dimension > HNSW_MAX_DIMENSIONS {
        bail!(
            "embedding dimension {} exceeds the {}-dimension limit of pgvector HNSW indexes",
            dimension,
            HNSW_MAX_DIMENSIONS
        );
    }
    Ok(())
}

pub fn hnsw_index_name(table: &str) -> String {
    format!("idx_{}_embedding_hnsw", table)
}

/// `CREATE INDEX` statement for the cosine HNSW index on `table`.
///
/// `table` must already be a validated identifier.
pub fn create_hnsw_index_sql(table: &str) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} USING hnsw (embedding vector_cosine_ops) \
         WITH (m = {}, ef_construction = {})",
        hnsw_index_name(table),
        table,
        HNSW_M,
        HNSW_EF_CONSTRUCTION
    )
}

/// Create the pgvector extension, the memory table, and its indexes.
pub async fn init_postgres(pool: &PgPool, table: &str, dimension: usize) -> Result<()> {
    check_indexable(dimension)?;

    sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
        .execute(pool)
        .await?;

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id UUID PRIMARY KEY,
            session_id TEXT NOT NULL,
            content TEXT NOT NULL CHECK (length(btrim(content)) > 0),
            metadata JSONB NOT NULL DEFAULT '{{}}'::jsonb,
            embedding vector({dimension}),
            scope TEXT NOT NULL DEFAULT 'PROJECT',
            project_id TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#
    ))
    .execute(pool)
    .await?;

    sqlx::query(&create_hnsw_index_sql(table))
        .execute(pool)
        .await?;

    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_{table}_scope_project ON {table}(scope, project_id)"
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_{table}_created_at ON {table}(created_at DESC)"
    ))
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the SQLite secondary's memory table.
pub async fn init_secondary(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS memories (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            content TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            scope TEXT NOT NULL DEFAULT 'PROJECT',
            project_id TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_memories_scope_project ON memories(scope, project_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_memories_created_at ON memories(created_at)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the retry queue table.
pub async fn init_queue(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS failed_learnings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            content TEXT NOT NULL,
            error TEXT,
            metadata_json TEXT,
            created_at TEXT NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0,
            last_retry TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_failed_learnings_due \
         ON failed_learnings(retry_count, created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// What `lmem init` set up.
#[derive(Debug, Default)]
pub struct InitReport {
    pub secondary: bool,
    pub queue: bool,
    /// `None` when no primary is configured.
    pub primary: Option<Result<(), String>>,
}

/// Bootstrap every configured backend.
///
/// The SQLite secondary and the queue must succeed. The primary is
/// attempted only when a DSN is configured, and a failure there is
/// reported rather than raised so `init` still works offline.
pub async fn run_migrations(config: &Config) -> Result<InitReport> {
    let mut report = InitReport::default();

    let secondary = db::connect_sqlite(&config.secondary.path).await?;
    init_secondary(&secondary).await?;
    secondary.close().await;
    report.secondary = true;

    let queue = db::connect_sqlite(&config.queue.path).await?;
    init_queue(&queue).await?;
    queue.close().await;
    report.queue = true;

    if let Some(dsn) = config.primary.dsn.as_deref() {
        let outcome = bootstrap_primary(config, dsn).await;
        if let Err(e) = &outcome {
            tracing::warn!(error = %format!("{:#}", e), "primary schema bootstrap failed");
        }
        report.primary = Some(outcome.map_err(|e| format!("{:#}", e)));
    }

    Ok(report)
}

async fn bootstrap_primary(config: &Config, dsn: &str) -> Result<()> {
    let pool = db::connect_postgres(&config.primary, dsn).await?;
    let result = init_postgres(&pool, &config.primary.table, config.embedding.dimension).await;
    pool.close().await;
    result
}
