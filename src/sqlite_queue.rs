//! SQLite-backed [`RetryQueue`].
//!
//! One local file holding the `failed_learnings` table. Timestamps are
//! stored as fixed-width RFC 3339 text, so `ORDER BY created_at` is
//! chronological.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use learning_memory_core::models::LearningOptions;
use learning_memory_core::queue::{QueuedLearning, RetryQueue};

use crate::sqlite_store::{format_ts, parse_ts};

pub struct SqliteRetryQueue {
    pool: SqlitePool,
}

impl SqliteRetryQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_entry(row: &SqliteRow) -> Result<QueuedLearning> {
    let metadata_json: Option<String> = row.get("metadata_json");
    let options = match metadata_json.as_deref() {
        Some(raw) if !raw.trim().is_empty() => serde_json::from_str::<LearningOptions>(raw)?,
        _ => LearningOptions::default(),
    };
    let created_at: String = row.get("created_at");
    let last_retry: Option<String> = row.get("last_retry");
    let retry_count: i64 = row.get("retry_count");

    Ok(QueuedLearning {
        id: row.get("id"),
        session_id: row.get("session_id"),
        content: row.get("content"),
        error: row.get("error"),
        options,
        created_at: parse_ts(&created_at)?,
        retry_count: retry_count.max(0) as u32,
        last_retry: last_retry.as_deref().map(parse_ts).transpose()?,
    })
}

#[async_trait]
impl RetryQueue for SqliteRetryQueue {
    async fn enqueue(
        &self,
        session_id: &str,
        content: &str,
        error: &str,
        options: &LearningOptions,
    ) -> Result<i64> {
        let metadata_json = serde_json::to_string(options)?;
        let result = sqlx::query(
            r#"
            INSERT INTO failed_learnings (session_id, content, error, metadata_json, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(session_id)
        .bind(content)
        .bind(error)
        .bind(&metadata_json)
        .bind(format_ts(Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn due(&self, max_retries: u32, limit: usize) -> Result<Vec<QueuedLearning>> {
        let rows = sqlx::query(
            r#"
            SELECT id, session_id, content, error, metadata_json, created_at, retry_count, last_retry
            FROM failed_learnings
            WHERE retry_count < ?
            ORDER BY created_at ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(max_retries as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn remove(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM failed_learnings WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_failure(&self, id: i64, error: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE failed_learnings
            SET retry_count = retry_count + 1, last_retry = ?, error = ?
            WHERE id = ?
            "#,
        )
        .bind(format_ts(at))
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remaining(&self, max_retries: u32) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM failed_learnings WHERE retry_count < ?")
                .bind(max_retries as i64)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }

    async fn len(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM failed_learnings")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}
