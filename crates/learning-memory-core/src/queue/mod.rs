//! Retry queue abstraction.
//!
//! Writes that reached neither store are parked here and replayed later.
//! The queue hands out entries oldest-first and never drops an entry on
//! its own: an entry leaves only through [`RetryQueue::remove`]. Entries
//! whose `retry_count` reached the configured maximum stay in place but
//! are no longer returned by [`RetryQueue::due`].

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{LearningOptions, StoreRequest};

/// A parked write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuedLearning {
    pub id: i64,
    pub session_id: String,
    pub content: String,
    /// Most recent failure.
    pub error: Option<String>,
    pub options: LearningOptions,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
    pub last_retry: Option<DateTime<Utc>>,
}

impl QueuedLearning {
    /// Rebuild the original store request for a replay.
    pub fn to_request(&self) -> StoreRequest {
        StoreRequest {
            session_id: self.session_id.clone(),
            content: self.content.clone(),
            options: self.options.clone(),
        }
    }
}

#[async_trait]
pub trait RetryQueue: Send + Sync {
    /// Append an entry, returning its id.
    async fn enqueue(
        &self,
        session_id: &str,
        content: &str,
        error: &str,
        options: &LearningOptions,
    ) -> Result<i64>;

    /// Up to `limit` entries with `retry_count < max_retries`, oldest first.
    async fn due(&self, max_retries: u32, limit: usize) -> Result<Vec<QueuedLearning>>;

    async fn remove(&self, id: i64) -> Result<()>;

    /// Bump `retry_count`, stamp `last_retry`, and keep the latest error.
    async fn record_failure(&self, id: i64, error: &str, at: DateTime<Utc>) -> Result<()>;

    /// Entries still eligible for retry.
    async fn remaining(&self, max_retries: u32) -> Result<u64>;

    /// All entries, stalled ones included.
    async fn len(&self) -> Result<u64>;
}
