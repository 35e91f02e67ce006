use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::config::PrimaryConfig;

/// Open (creating if missing) a SQLite database file in WAL mode.
pub async fn connect_sqlite(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open SQLite database: {}", db_path.display()))?;

    Ok(pool)
}

/// Connect to the Postgres primary.
pub async fn connect_postgres(config: &PrimaryConfig, dsn: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.pool_max_conns)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect(dsn)
        .await
        .with_context(|| "Failed to connect to Postgres primary")?;

    Ok(pool)
}
