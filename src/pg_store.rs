//! PostgreSQL + pgvector [`MemoryStore`]: the primary.
//!
//! Vectors travel as pgvector text literals (`[0.1,0.2]`) cast with
//! `$n::text::vector`, so no pgvector-specific sqlx codec is needed.
//! Similarity is `1 - cosine distance` as computed by the `<=>` operator.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use learning_memory_core::models::{LearningMetadata, MemoryHit, NewMemory, Scope};
use learning_memory_core::store::{
    query_terms, text_match_score, BackendKind, MemoryStore, PendingEmbedding, Visibility,
};

/// Render a vector as a pgvector text literal.
pub fn vector_to_pg(vec: &[f32]) -> String {
    let mut out = String::with_capacity(vec.len() * 8);
    out.push('[');
    for (i, value) in vec.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&value.to_string());
    }
    out.push(']');
    out
}

pub struct PgStore {
    pool: PgPool,
    table: String,
}

impl PgStore {
    /// `table` must be a validated identifier; it is spliced into SQL.
    pub fn new(pool: PgPool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }
}

fn row_to_hit(row: &PgRow) -> Result<MemoryHit> {
    let id: Uuid = row.get("id");
    let metadata: Value = row.get("metadata");
    let scope: String = row.get("scope");
    let created_at: DateTime<Utc> = row.get("created_at");
    let similarity: f32 = row.get("similarity");

    Ok(MemoryHit {
        id: id.to_string(),
        content: row.get("content"),
        metadata: LearningMetadata::from_stored(metadata)?,
        scope: scope.parse::<Scope>()?,
        project_id: row.get("project_id"),
        created_at,
        similarity,
    })
}

fn parse_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).with_context(|| format!("invalid memory id: {}", id))
}

#[async_trait]
impl MemoryStore for PgStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Postgres
    }

    fn supports_vectors(&self) -> bool {
        true
    }

    async fn insert(&self, memory: &NewMemory) -> Result<String> {
        if memory.content.trim().is_empty() {
            bail!("refusing to store empty content");
        }

        let id = Uuid::new_v4();
        let embedding = memory.embedding.as_deref().map(vector_to_pg);

        sqlx::query(&format!(
            r#"
            INSERT INTO {} (id, session_id, content, metadata, embedding, scope, project_id, created_at)
            VALUES ($1, $2, $3, $4, $5::text::vector, $6, $7, now())
            "#,
            self.table
        ))
        .bind(id)
        .bind(&memory.metadata.session_id)
        .bind(&memory.content)
        .bind(Json(&memory.metadata))
        .bind(embedding)
        .bind(memory.scope.as_str())
        .bind(&memory.project_id)
        .execute(&self.pool)
        .await?;

        Ok(id.to_string())
    }

    async fn nearest(
        &self,
        query: &[f32],
        limit: usize,
        visibility: &Visibility,
    ) -> Result<Vec<MemoryHit>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(&format!(
            r#"
            SELECT id, content, metadata, scope, project_id, created_at,
                   (1 - (embedding <=> $1::text::vector))::real AS similarity
            FROM {}
            WHERE embedding IS NOT NULL
              AND ($2::text IS NULL OR scope = 'GLOBAL' OR project_id IS NULL OR project_id = $2)
            ORDER BY embedding <=> $1::text::vector
            LIMIT $3
            "#,
            self.table
        ))
        .bind(vector_to_pg(query))
        .bind(&visibility.project_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_hit).collect()
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

        let rows = sqlx::query(&format!(
            r#"
            SELECT id, content, metadata, scope, project_id, created_at, 0::real AS similarity
            FROM {}
            WHERE $1::text IS NULL OR scope = 'GLOBAL' OR project_id IS NULL OR project_id = $1
            "#,
            self.table
        ))
        .bind(&visibility.project_id)
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::new();
        for row in &rows {
            let content: String = row.get("content");
            let score = text_match_score(&terms, &content);
            if score > 0.0 {
                let mut hit = row_to_hit(row)?;
                hit.similarity = score;
                hits.push(hit);
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

    async fn pending_embeddings(
        &self,
        limit: Option<usize>,
        force: bool,
    ) -> Result<Vec<PendingEmbedding>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT id, content FROM {}
            WHERE $1 OR embedding IS NULL
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            "#,
            self.table
        ))
        .bind(force)
        .bind(limit.map(|l| l as i64))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let id: Uuid = row.get("id");
                PendingEmbedding {
                    id: id.to_string(),
                    content: row.get("content"),
                }
            })
            .collect())
    }

    async fn set_embedding(&self, id: &str, vector: &[f32]) -> Result<()> {
        let result = sqlx::query(&format!(
            r#"
            UPDATE {}
            SET embedding = $1::text::vector,
                metadata = metadata - 'embedding_status' - 'embedding_error'
            WHERE id = $2
            "#,
            self.table
        ))
        .bind(vector_to_pg(vector))
        .bind(parse_id(id)?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            bail!("memory not found: {}", id);
        }
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", self.table))
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_literal() {
        assert_eq!(vector_to_pg(&[0.5, -1.0, 0.0]), "[0.5,-1,0]");
        assert_eq!(vector_to_pg(&[]), "[]");
    }

    #[test]
    fn test_invalid_id_rejected() {
        assert!(parse_id("not-a-uuid").is_err());
        assert!(parse_id("67e55044-10b1-426f-9247-bb680e5fe0c8").is_ok());
    }
}
