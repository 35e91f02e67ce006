//! In-memory [`MemoryStore`] implementation for tests and embedding.
//!
//! Uses a `Vec` behind `std::sync::RwLock`. Vector search is brute-force
//! cosine similarity over all stored vectors; text search scores rows with
//! [`text_match_score`](super::text_match_score).
//!
//! The store can pose as either backend kind, with or without vector
//! support, so pipeline tests can stand it in for Postgres or SQLite.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::embedding::cosine_similarity;
use crate::models::{LearningMetadata, MemoryHit, NewMemory, Scope};

use super::{
    query_terms, text_match_score, BackendKind, MemoryStore, PendingEmbedding, Visibility,
};

#[derive(Debug, Clone)]
struct StoredMemory {
    id: String,
    content: String,
    metadata: LearningMetadata,
    embedding: Option<Vec<f32>>,
    scope: Scope,
    project_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl StoredMemory {
    fn hit(&self, similarity: f32) -> MemoryHit {
        MemoryHit {
            id: self.id.clone(),
            content: self.content.clone(),
            metadata: self.metadata.clone(),
            scope: self.scope,
            project_id: self.project_id.clone(),
            created_at: self.created_at,
            similarity,
        }
    }
}

/// In-memory store for tests.
pub struct InMemoryStore {
    kind: BackendKind,
    vectors: bool,
    rows: RwLock<Vec<StoredMemory>>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl InMemoryStore {
    pub fn new(kind: BackendKind, vectors: bool) -> Self {
        Self {
            kind,
            vectors,
            rows: RwLock::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
        }
    }

    /// A vector-capable store posing as the Postgres primary.
    pub fn primary() -> Self {
        Self::new(BackendKind::Postgres, true)
    }

    /// A store without vectors posing as the SQLite secondary.
    pub fn secondary() -> Self {
        Self::new(BackendKind::Sqlite, false)
    }

    /// Make every subsequent `insert` fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `nearest` and `search_text` fail.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of stored contents, in insertion order.
    pub fn contents(&self) -> Vec<String> {
        self.read().iter().map(|r| r.content.clone()).collect()
    }

    /// Stored metadata, vector, scope and project for one record.
    pub fn get(
        &self,
        id: &str,
    ) -> Option<(LearningMetadata, Option<Vec<f32>>, Scope, Option<String>)> {
        self.read().iter().find(|r| r.id == id).map(|r| {
            (
                r.metadata.clone(),
                r.embedding.clone(),
                r.scope,
                r.project_id.clone(),
            )
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<StoredMemory>> {
        self.rows.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<StoredMemory>> {
        self.rows.write().unwrap_or_else(|e| e.into_inner())
    }

    fn check_reads(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            bail!("{} store unavailable", self.kind);
        }
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::primary()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    fn backend(&self) -> BackendKind {
        self.kind
    }

    fn supports_vectors(&self) -> bool {
        self.vectors
    }

    async fn insert(&self, memory: &NewMemory) -> Result<String> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("{} store unavailable", self.kind);
        }
        if memory.content.trim().is_empty() {
            bail!("refusing to store empty content");
        }
        if memory.embedding.is_some() && !self.vectors {
            bail!("{} store has no vector column", self.kind);
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.write().push(StoredMemory {
            id: id.clone(),
            content: memory.content.clone(),
            metadata: memory.metadata.clone(),
            embedding: memory.embedding.clone(),
            scope: memory.scope,
            project_id: memory.project_id.clone(),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn nearest(
        &self,
        query: &[f32],
        limit: usize,
        visibility: &Visibility,
    ) -> Result<Vec<MemoryHit>> {
        if !self.vectors {
            bail!("{} store does not support vector search", self.kind);
        }
        self.check_reads()?;

        let rows = self.read();
        let mut hits: Vec<MemoryHit> = rows
            .iter()
            .filter(|r| visibility.admits(r.scope, r.project_id.as_deref()))
            .filter_map(|r| {
                r.embedding
                    .as_ref()
                    .map(|v| r.hit(cosine_similarity(query, v)))
            })
            .collect();

        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn search_text(
        &self,
        query: &str,
        limit: usize,
        visibility: &Visibility,
    ) -> Result<Vec<MemoryHit>> {
        self.check_reads()?;

        let terms = query_terms(query);
        let rows = self.read();
        let mut hits: Vec<MemoryHit> = rows
            .iter()
            .filter(|r| visibility.admits(r.scope, r.project_id.as_deref()))
            .filter_map(|r| {
                let score = text_match_score(&terms, &r.content);
                (score > 0.0).then(|| r.hit(score))
            })
            .collect();

        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn pending_embeddings(
        &self,
        limit: Option<usize>,
        force: bool,
    ) -> Result<Vec<PendingEmbedding>> {
        let rows = self.read();
        let pending = rows
            .iter()
            .filter(|r| force || r.embedding.is_none())
            .take(limit.unwrap_or(usize::MAX))
            .map(|r| PendingEmbedding {
                id: r.id.clone(),
                content: r.content.clone(),
            })
            .collect();
        Ok(pending)
    }

    async fn set_embedding(&self, id: &str, vector: &[f32]) -> Result<()> {
        if !self.vectors {
            bail!("{} store has no vector column", self.kind);
        }
        let mut rows = self.write();
        let Some(row) = rows.iter_mut().find(|r| r.id == id) else {
            bail!("memory not found: {}", id);
        };
        row.embedding = Some(vector.to_vec());
        row.metadata.clear_pending();
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.read().len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory(
        content: &str,
        embedding: Option<Vec<f32>>,
        scope: Scope,
        project: Option<&str>,
    ) -> NewMemory {
        NewMemory {
            content: content.to_string(),
            metadata: LearningMetadata::new("s1", Utc::now()),
            embedding,
            scope,
            project_id: project.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_nearest_orders_by_similarity() {
        let store = InMemoryStore::primary();
        store
            .insert(&memory("a", Some(vec![1.0, 0.0]), Scope::Global, None))
            .await
            .unwrap();
        store
            .insert(&memory("b", Some(vec![0.7, 0.7]), Scope::Global, None))
            .await
            .unwrap();
        store
            .insert(&memory("c", None, Scope::Global, None))
            .await
            .unwrap();

        let hits = store
            .nearest(&[1.0, 0.0], 5, &Visibility::all())
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].content, "a");
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].content, "b");
    }

    #[tokio::test]
    async fn test_visibility_filters_other_projects() {
        let store = InMemoryStore::primary();
        store
            .insert(&memory("mine", Some(vec![1.0]), Scope::Project, Some("p1")))
            .await
            .unwrap();
        store
            .insert(&memory("theirs", Some(vec![1.0]), Scope::Project, Some("p2")))
            .await
            .unwrap();
        store
            .insert(&memory("shared", Some(vec![1.0]), Scope::Global, None))
            .await
            .unwrap();

        let hits = store
            .nearest(&[1.0], 10, &Visibility::project("p1"))
            .await
            .unwrap();
        let mut names: Vec<_> = hits.into_iter().map(|h| h.content).collect();
        names.sort();
        assert_eq!(names, vec!["mine", "shared"]);
    }

    #[tokio::test]
    async fn test_rejects_empty_content() {
        let store = InMemoryStore::primary();
        let err = store
            .insert(&memory("   ", None, Scope::Project, None))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("empty"));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_secondary_has_no_vectors() {
        let store = InMemoryStore::secondary();
        assert!(store.nearest(&[1.0], 1, &Visibility::all()).await.is_err());
        assert!(store
            .insert(&memory("x", Some(vec![1.0]), Scope::Project, None))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_set_embedding_clears_pending() {
        let store = InMemoryStore::primary();
        let mut m = memory("x", None, Scope::Project, None);
        m.metadata.mark_pending("offline");
        let id = store.insert(&m).await.unwrap();

        let pending = store.pending_embeddings(None, false).await.unwrap();
        assert_eq!(pending.len(), 1);

        store.set_embedding(&id, &[0.5, 0.5]).await.unwrap();
        let (meta, vec, _, _) = store.get(&id).unwrap();
        assert!(!meta.is_pending());
        assert_eq!(vec, Some(vec![0.5, 0.5]));
        assert!(store.pending_embeddings(None, false).await.unwrap().is_empty());
        assert_eq!(store.pending_embeddings(None, true).await.unwrap().len(), 1);
    }
}
