//! SQLite-backed [`MemoryStore`]: the file-based secondary.
//!
//! Has no vector column. Records written here carry no embedding, vector
//! queries fail, and text search is scored in-process with the shared
//! term-overlap scorer.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use learning_memory_core::models::{LearningMetadata, MemoryHit, NewMemory, Scope};
use learning_memory_core::store::{
    query_terms, text_match_score, BackendKind, MemoryStore, PendingEmbedding, Visibility,
};

/// SQLite implementation of the [`MemoryStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Fixed-width RFC 3339 so lexical order matches time order.
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid timestamp: {}", raw))?
        .with_timezone(&Utc))
}

fn row_to_hit(row: &SqliteRow, similarity: f32) -> Result<MemoryHit> {
    let metadata_json: String = row.get("metadata_json");
    let scope: String = row.get("scope");
    let created_at: String = row.get("created_at");

    Ok(MemoryHit {
        id: row.get("id"),
        content: row.get("content"),
        metadata: LearningMetadata::from_stored(serde_json::from_str(&metadata_json)?)?,
        scope: scope.parse::<Scope>()?,
        project_id: row.get("project_id"),
        created_at: parse_ts(&created_at)?,
        similarity,
    })
}

#[async_trait]
impl MemoryStore for SqliteStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn supports_vectors(&self) -> bool {
        false
    }

    async fn insert(&self, memory: &NewMemory) -> Result<String> {
        if memory.content.trim().is_empty() {
            bail!("refusing to store empty content");
        }

        let id = uuid::Uuid::new_v4().to_string();
        let metadata_json = serde_json::to_string(&memory.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO memories (id, session_id, content, metadata_json, scope, project_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&memory.metadata.session_id)
        .bind(&memory.content)
        .bind(&metadata_json)
        .bind(memory.scope.as_str())
        .bind(&memory.project_id)
        .bind(format_ts(Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn nearest(
        &self,
        _query: &[f32],
        _limit: usize,
        _visibility: &Visibility,
    ) -> Result<Vec<MemoryHit>> {
        bail!("sqlite store does not support vector search")
    }

    async fn search_text(
        &self,
        query: &str,
        limit: usize,
        visibility: &Visibility,
    ) -> Result<Vec<MemoryHit>> {
        let terms = query_terms(query);
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT id, content, metadata_json, scope, project_id, created_at
            FROM memories
            WHERE ? IS NULL OR scope = 'GLOBAL' OR project_id IS NULL OR project_id = ?
            "#,
        )
        .bind(&visibility.project_id)
        .bind(&visibility.project_id)
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::new();
        for row in &rows {
            let content: String = row.get("content");
            let score = text_match_score(&terms, &content);
            if score > 0.0 {
                hits.push(row_to_hit(row, score)?);
            }
        }

        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then(b.created_at.cmp(&a.created_at))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    /// The secondary never holds vectors, so nothing here can be backfilled.
    async fn pending_embeddings(
        &self,
        _limit: Option<usize>,
        _force: bool,
    ) -> Result<Vec<PendingEmbedding>> {
        Ok(Vec::new())
    }

    async fn set_embedding(&self, _id: &str, _vector: &[f32]) -> Result<()> {
        bail!("sqlite store has no vector column")
    }

    async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM memories")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}
