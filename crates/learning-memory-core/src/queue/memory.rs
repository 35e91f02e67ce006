//! In-memory [`RetryQueue`] for tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::LearningOptions;

use super::{QueuedLearning, RetryQueue};

#[derive(Default)]
struct State {
    next_id: i64,
    entries: Vec<QueuedLearning>,
}

#[derive(Default)]
pub struct InMemoryRetryQueue {
    state: Mutex<State>,
    fail_enqueue: AtomicBool,
}

impl InMemoryRetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `enqueue` fail.
    pub fn set_fail_enqueue(&self, fail: bool) {
        self.fail_enqueue.store(fail, Ordering::SeqCst);
    }

    pub fn entries(&self) -> Vec<QueuedLearning> {
        self.lock().entries.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl RetryQueue for InMemoryRetryQueue {
    async fn enqueue(
        &self,
        session_id: &str,
        content: &str,
        error: &str,
        options: &LearningOptions,
    ) -> Result<i64> {
        if self.fail_enqueue.load(Ordering::SeqCst) {
            bail!("retry queue unavailable");
        }
        let mut state = self.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.entries.push(QueuedLearning {
            id,
            session_id: session_id.to_string(),
            content: content.to_string(),
            error: Some(error.to_string()),
            options: options.clone(),
            created_at: Utc::now(),
            retry_count: 0,
            last_retry: None,
        });
        Ok(id)
    }

    async fn due(&self, max_retries: u32, limit: usize) -> Result<Vec<QueuedLearning>> {
        let state = self.lock();
        let mut due: Vec<QueuedLearning> = state
            .entries
            .iter()
            .filter(|e| e.retry_count < max_retries)
            .cloned()
            .collect();
        due.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        due.truncate(limit);
        Ok(due)
    }

    async fn remove(&self, id: i64) -> Result<()> {
        self.lock().entries.retain(|e| e.id != id);
        Ok(())
    }

    async fn record_failure(&self, id: i64, error: &str, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.lock();
        let Some(entry) = state.entries.iter_mut().find(|e| e.id == id) else {
            bail!("queue entry not found: {}", id);
        };
        entry.retry_count += 1;
        entry.last_retry = Some(at);
        entry.error = Some(error.to_string());
        Ok(())
    }

    async fn remaining(&self, max_retries: u32) -> Result<u64> {
        let state = self.lock();
        Ok(state
            .entries
            .iter()
            .filter(|e| e.retry_count < max_retries)
            .count() as u64)
    }

    async fn len(&self) -> Result<u64> {
        Ok(self.lock().entries.len() as u64)
    }
}
