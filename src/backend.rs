//! Backend resolution: which store a write goes to.
//!
//! Evaluated per call. With a primary DSN configured, a short TCP connect
//! to the DSN's host:port decides between the primary and the secondary
//! (flagged as a fallback). Without one, the configured default backend
//! is used.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::{PgPool, SqlitePool};
use tokio::net::TcpStream;
use tokio::sync::OnceCell;

use learning_memory_core::store::{BackendKind, MemoryStore};

use crate::config::{Config, PrimaryConfig};
use crate::pg_store::PgStore;
use crate::sqlite_store::SqliteStore;
use crate::{db, migrate};

const DEFAULT_PG_PORT: u16 = 5432;

/// Fallback reason when the reachability probe fails.
pub const PRIMARY_UNREACHABLE: &str = "PostgreSQL unreachable";

/// Source of store handles for the write pipeline.
///
/// [`ConfiguredBackends`] is the production implementation; tests supply
/// their own over in-memory stores.
#[async_trait]
pub trait BackendProvider: Send + Sync {
    /// Whether a primary connection string is configured at all.
    fn primary_configured(&self) -> bool;

    /// Cheap reachability check, bounded by the probe timeout.
    async fn primary_reachable(&self) -> bool;

    /// Backend to use when no primary is configured.
    fn default_backend(&self) -> BackendKind;

    async fn open(&self, kind: BackendKind) -> Result<Arc<dyn MemoryStore>>;
}

/// Outcome of backend selection for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub kind: BackendKind,
    pub used_fallback: bool,
    pub reason: Option<String>,
}

pub async fn select_backend(provider: &dyn BackendProvider) -> Selection {
    if !provider.primary_configured() {
        return Selection {
            kind: provider.default_backend(),
            used_fallback: false,
            reason: None,
        };
    }

    if provider.primary_reachable().await {
        Selection {
            kind: BackendKind::Postgres,
            used_fallback: false,
            reason: None,
        }
    } else {
        tracing::warn!("primary unreachable, selecting secondary");
        Selection {
            kind: BackendKind::Sqlite,
            used_fallback: true,
            reason: Some(PRIMARY_UNREACHABLE.to_string()),
        }
    }
}

/// Open the store a read should use: the selected backend, or the
/// secondary when the primary cannot be opened.
pub async fn open_for_read(provider: &dyn BackendProvider) -> Result<Arc<dyn MemoryStore>> {
    let selection = select_backend(provider).await;
    match provider.open(selection.kind).await {
        Ok(store) => Ok(store),
        Err(e) if selection.kind == BackendKind::Postgres => {
            tracing::warn!(error = %format!("{:#}", e), "primary unavailable for read, using secondary");
            provider.open(BackendKind::Sqlite).await
        }
        Err(e) => Err(e),
    }
}

/// Host and port to probe for a Postgres DSN.
///
/// Accepts URL form (`postgres://user@host:port/db`) and key/value form
/// (`host=db port=5433 dbname=x`). Missing parts default to
/// `localhost:5432`.
pub fn probe_target(dsn: &str) -> Option<(String, u16)> {
    let dsn = dsn.trim();
    if dsn.contains("://") {
        let url = reqwest::Url::parse(dsn).ok()?;
        let host = url.host_str().filter(|h| !h.is_empty()).unwrap_or("localhost");
        let host = host.trim_start_matches('[').trim_end_matches(']');
        return Some((host.to_string(), url.port().unwrap_or(DEFAULT_PG_PORT)));
    }

    let mut host = None;
    let mut port = None;
    for pair in dsn.split_whitespace() {
        match pair.split_once('=') {
            Some(("host", v)) => host = Some(v.trim_matches('\'').to_string()),
            Some(("port", v)) => port = Some(v.trim_matches('\'').parse::<u16>().ok()?),
            _ => {}
        }
    }
    Some((
        host.unwrap_or_else(|| "localhost".to_string()),
        port.unwrap_or(DEFAULT_PG_PORT),
    ))
}

/// TCP connect to `host:port`, giving up after `timeout`.
pub async fn probe(host: &str, port: u16, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

/// Stores opened from a [`Config`]. Pools are created on first use and
/// reused for the life of the value.
pub struct ConfiguredBackends {
    primary: PrimaryConfig,
    secondary_path: PathBuf,
    default: BackendKind,
    pg: OnceCell<PgPool>,
    sqlite: OnceCell<SqlitePool>,
}

impl ConfiguredBackends {
    pub fn new(config: &Config) -> Self {
        Self {
            primary: config.primary.clone(),
            secondary_path: config.secondary.path.clone(),
            default: config.storage.default_backend,
            pg: OnceCell::new(),
            sqlite: OnceCell::new(),
        }
    }

    async fn pg_pool(&self) -> Result<&PgPool> {
        let dsn = self
            .primary
            .dsn
            .as_deref()
            .ok_or_else(|| anyhow!("no primary DSN configured"))?;
        self.pg
            .get_or_try_init(|| db::connect_postgres(&self.primary, dsn))
            .await
    }

    async fn sqlite_pool(&self) -> Result<&SqlitePool> {
        self.sqlite
            .get_or_try_init(|| async {
                let pool = db::connect_sqlite(&self.secondary_path).await?;
                migrate::init_secondary(&pool).await?;
                Ok::<_, anyhow::Error>(pool)
            })
            .await
    }
}

#[async_trait]
impl BackendProvider for ConfiguredBackends {
    fn primary_configured(&self) -> bool {
        self.primary.dsn.is_some()
    }

    async fn primary_reachable(&self) -> bool {
        let Some((host, port)) = self.primary.dsn.as_deref().and_then(probe_target) else {
            return false;
        };
        probe(&host, port, Duration::from_millis(self.primary.probe_timeout_ms)).await
    }

    fn default_backend(&self) -> BackendKind {
        self.default
    }

    async fn open(&self, kind: BackendKind) -> Result<Arc<dyn MemoryStore>> {
        match kind {
            BackendKind::Postgres => {
                let pool = self.pg_pool().await?;
                Ok(Arc::new(PgStore::new(pool.clone(), self.primary.table.clone())))
            }
            BackendKind::Sqlite => {
                let pool = self.sqlite_pool().await?;
                Ok(Arc::new(SqliteStore::new(pool.clone())))
            }
        }
    }
}
