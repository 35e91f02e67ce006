//! Storage abstraction for Learning Memory.
//!
//! The [`MemoryStore`] trait defines every storage operation the write
//! pipeline, the context assembler, and the embedding backfill need,
//! enabling pluggable backends (Postgres with pgvector, SQLite, in-memory).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{MemoryHit, NewMemory, ParseEnumError, Scope};

/// Which storage engine a store is backed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Postgres,
    Sqlite,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Postgres => "postgres",
            BackendKind::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(BackendKind::Postgres),
            "sqlite" => Ok(BackendKind::Sqlite),
            _ => Err(ParseEnumError {
                kind: "backend",
                value: s.to_string(),
            }),
        }
    }
}

/// Which scoped records a read may return.
///
/// With no current project every record is visible. With a current
/// project, a record is visible when it is `GLOBAL`, carries no
/// `project_id`, or belongs to that project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Visibility {
    pub project_id: Option<String>,
}

impl Visibility {
    pub fn all() -> Self {
        Self { project_id: None }
    }

    pub fn project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
        }
    }

    pub fn admits(&self, scope: Scope, project_id: Option<&str>) -> bool {
        match self.project_id.as_deref() {
            None => true,
            Some(current) => {
                scope == Scope::Global || project_id.is_none() || project_id == Some(current)
            }
        }
    }
}

/// A record still waiting for a vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEmbedding {
    pub id: String,
    pub content: String,
}

/// Abstract storage backend for memory records.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert`](MemoryStore::insert) | Persist a new record, returning its id |
/// | [`nearest`](MemoryStore::nearest) | Nearest neighbors by cosine similarity |
/// | [`search_text`](MemoryStore::search_text) | Term-overlap or full-text search |
/// | [`pending_embeddings`](MemoryStore::pending_embeddings) | Records without a vector |
/// | [`set_embedding`](MemoryStore::set_embedding) | Backfill a vector |
/// | [`count`](MemoryStore::count) | Number of stored records |
#[async_trait]
pub trait MemoryStore: Send + Sync {
    fn backend(&self) -> BackendKind;

    /// Whether this store has a vector column. Stores without one
    /// return an error from [`nearest`](MemoryStore::nearest) and
    /// [`set_embedding`](MemoryStore::set_embedding).
    fn supports_vectors(&self) -> bool;

    /// Persist a new record. Empty or whitespace-only content is rejected.
    async fn insert(&self, memory: &NewMemory) -> Result<String>;

    /// Records with a vector, most similar first.
    async fn nearest(
        &self,
        query: &[f32],
        limit: usize,
        visibility: &Visibility,
    ) -> Result<Vec<MemoryHit>>;

    /// Records matching the query text, best match first. Records with a
    /// zero score are omitted.
    async fn search_text(
        &self,
        query: &str,
        limit: usize,
        visibility: &Visibility,
    ) -> Result<Vec<MemoryHit>>;

    /// Records missing a vector, oldest first. With `force`, every record.
    async fn pending_embeddings(
        &self,
        limit: Option<usize>,
        force: bool,
    ) -> Result<Vec<PendingEmbedding>>;

    /// Write a vector for an existing record and clear its pending markers.
    async fn set_embedding(&self, id: &str, vector: &[f32]) -> Result<()>;

    async fn count(&self) -> Result<u64>;
}

/// Lowercased query terms of at least three characters, in order of
/// first appearance, without repeats.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for raw in query.split(|c: char| !c.is_alphanumeric()) {
        let term = raw.to_lowercase();
        if term.chars().count() >= 3 && !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

/// Fraction of `terms` that match `content`, in `[0.0, 1.0]`.
///
/// A term matches when it occurs in the lowercased content, or when a
/// content word of four or more characters is a prefix of it, so that
/// `auth` in the content matches the query term `authentication`.
pub fn text_match_score(terms: &[String], content: &str) -> f32 {
    if terms.is_empty() {
        return 0.0;
    }
    let lowered = content.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 4)
        .collect();

    let matched = terms
        .iter()
        .filter(|term| {
            lowered.contains(term.as_str()) || words.iter().any(|w| term.starts_with(w))
        })
        .count();

    matched as f32 / terms.len() as f32
}
