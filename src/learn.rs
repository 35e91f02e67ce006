//! The write pipeline: `SelectBackend → Embed → Dedup → Persist(primary)
//! →[fail]→ Persist(secondary) →[fail]→ Fail`.
//!
//! [`LearningService::store`] never returns `Err`; every failure becomes a
//! [`StoreOutcome`] with `success: false` and a human-readable `error`.
//! [`LearningService::store_or_enqueue`] additionally parks totally failed
//! writes in the retry queue, and [`LearningService::drain`] replays them.
//!
//! # Known race
//!
//! The duplicate check runs before the insert with no lock around the
//! pair. Two concurrent calls with near-identical content can both pass
//! the check and both persist.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;

use learning_memory_core::dedup::{check_duplicate, DedupDecision, DEDUP_THRESHOLD};
use learning_memory_core::embedding::{Embedder, EmbeddingOutcome};
use learning_memory_core::models::{LearningMetadata, NewMemory, Scope, StoreRequest};
use learning_memory_core::queue::RetryQueue;
use learning_memory_core::scope::classify_scope;
use learning_memory_core::store::BackendKind;

use crate::backend::{select_backend, BackendProvider, ConfiguredBackends, Selection};
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::project::ProjectIdentity;
use crate::sqlite_queue::SqliteRetryQueue;
use crate::{db, migrate};

/// Why a write produced no record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    #[error("No content provided")]
    EmptyContent,
    /// The selected backend failed and there was nothing to fall back to.
    #[error("{backend} write failed: {error}")]
    Backend { backend: BackendKind, error: String },
    #[error("Both backends failed: pg={primary}, sqlite={secondary}")]
    BothBackendsFailed { primary: String, secondary: String },
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// Structured result of one store call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_id: Option<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendKind>,
    #[serde(skip_serializing_if = "is_false")]
    pub used_fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_dim: Option<usize>,
    #[serde(skip_serializing_if = "is_false")]
    pub embedding_pending: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_length: Option<usize>,
    /// Set by [`LearningService::store_or_enqueue`] when a failed write
    /// was parked in the retry queue.
    #[serde(skip_serializing_if = "is_false")]
    pub queued: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StoreOutcome {
    pub fn failed(error: impl ToString) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            ..Default::default()
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            success: true,
            skipped: true,
            reason: Some(reason.into()),
            ..Default::default()
        }
    }

    fn duplicate(existing_id: String, similarity: f32) -> Self {
        Self {
            existing_id: Some(existing_id),
            similarity: Some(similarity),
            ..Self::skipped(format!("duplicate (similarity: {:.2})", similarity))
        }
    }

    /// Whether a queued entry that produced this outcome can be removed.
    pub fn is_genuine_success(&self) -> bool {
        self.success && !self.used_fallback
    }
}

/// Counts from one [`LearningService::drain`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Entries still eligible for automatic retry.
    pub remaining: u64,
}

/// Scope and project id for a request, fixed before any backend is touched.
struct Placement {
    scope: Scope,
    project_id: Option<String>,
}

impl Placement {
    fn for_request(request: &StoreRequest) -> Self {
        let options = &request.options;
        let scope = options.scope.unwrap_or_else(|| {
            classify_scope(&request.content, &options.tags, options.context.as_deref())
        });
        let project_id = match scope {
            Scope::Project => options
                .project_dir
                .as_deref()
                .map(|dir| ProjectIdentity::resolve(dir).id),
            Scope::Global => None,
        };
        Self { scope, project_id }
    }
}

fn build_metadata(request: &StoreRequest) -> LearningMetadata {
    let options = &request.options;
    let mut metadata = LearningMetadata::new(request.session_id.clone(), Utc::now());
    metadata.learning_type = options.learning_type;
    metadata.context = options.context.clone();
    metadata.tags = options.tags.clone();
    metadata.confidence = options.confidence;
    metadata
}

pub struct LearningService {
    backends: Arc<dyn BackendProvider>,
    embedder: Arc<dyn Embedder>,
    queue: Arc<dyn RetryQueue>,
    dimension: usize,
    drain_lock: Mutex<()>,
}

impl LearningService {
    pub fn new(
        backends: Arc<dyn BackendProvider>,
        embedder: Arc<dyn Embedder>,
        queue: Arc<dyn RetryQueue>,
        dimension: usize,
    ) -> Self {
        Self {
            backends,
            embedder,
            queue,
            dimension,
            drain_lock: Mutex::new(()),
        }
    }

    /// Wire up the configured backends, embedder, and SQLite retry queue.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let backends = Arc::new(ConfiguredBackends::new(config));
        let embedder = create_embedder(&config.embedding)?;
        let pool = db::connect_sqlite(&config.queue.path).await?;
        migrate::init_queue(&pool).await?;
        let queue = Arc::new(SqliteRetryQueue::new(pool));
        Ok(Self::new(backends, embedder, queue, config.embedding.dimension))
    }

    /// Run the pipeline once.
    pub async fn store(&self, request: &StoreRequest) -> StoreOutcome {
        match self.run(request).await {
            Ok(outcome) => outcome,
            Err(e) => StoreOutcome::failed(e),
        }
    }

    /// Run the pipeline and, if both backends fail, park the request in
    /// the retry queue. Enqueue failures are logged and swallowed.
    pub async fn store_or_enqueue(&self, request: &StoreRequest) -> StoreOutcome {
        let error = match self.run(request).await {
            Ok(outcome) => return outcome,
            Err(e) => e,
        };
        let mut outcome = StoreOutcome::failed(&error);
        if error == WriteError::EmptyContent {
            return outcome;
        }

        match self
            .queue
            .enqueue(
                &request.session_id,
                &request.content,
                &error.to_string(),
                &request.options,
            )
            .await
        {
            Ok(queue_id) => {
                tracing::info!(queue_id, "learning queued for retry");
                outcome.queued = true;
            }
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "failed to enqueue learning, dropping it");
            }
        }
        outcome
    }

    /// Replay up to `batch_limit` queued writes with `retry_count <
    /// max_retries`, oldest first.
    ///
    /// An entry is removed only when the replay succeeds without falling
    /// back; otherwise its retry count is bumped. One drain runs at a time
    /// per service.
    pub async fn drain(&self, max_retries: u32, batch_limit: usize) -> Result<DrainReport> {
        let _guard = self.drain_lock.lock().await;

        let due = self.queue.due(max_retries, batch_limit).await?;
        let mut report = DrainReport {
            attempted: due.len(),
            ..Default::default()
        };

        for entry in due {
            let outcome = self.store(&entry.to_request()).await;
            if outcome.is_genuine_success() {
                self.queue.remove(entry.id).await?;
                report.succeeded += 1;
            } else {
                let error = outcome
                    .error
                    .or(outcome.fallback_reason)
                    .unwrap_or_else(|| "stored on fallback backend".to_string());
                tracing::debug!(queue_id = entry.id, error = %error, "replay did not reach primary");
                self.queue.record_failure(entry.id, &error, Utc::now()).await?;
                report.failed += 1;
            }
        }

        report.remaining = self.queue.remaining(max_retries).await?;
        tracing::info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            remaining = report.remaining,
            "retry queue drained"
        );
        Ok(report)
    }

    async fn run(&self, request: &StoreRequest) -> Result<StoreOutcome, WriteError> {
        if request.content.trim().is_empty() {
            return Err(WriteError::EmptyContent);
        }

        let selection = select_backend(self.backends.as_ref()).await;
        tracing::debug!(backend = %selection.kind, fallback = selection.used_fallback, "backend selected");
        let placement = Placement::for_request(request);

        match self.persist_selected(request, &selection, &placement).await {
            Ok(outcome) => Ok(outcome),
            Err(primary) if selection.kind == BackendKind::Postgres => {
                tracing::warn!(error = %primary, "primary write failed, retrying on secondary");
                self.persist_secondary(request, &placement, primary).await
            }
            Err(error) => Err(WriteError::Backend {
                backend: selection.kind,
                error,
            }),
        }
    }

    async fn persist_selected(
        &self,
        request: &StoreRequest,
        selection: &Selection,
        placement: &Placement,
    ) -> Result<StoreOutcome, String> {
        let store = self
            .backends
            .open(selection.kind)
            .await
            .map_err(|e| format!("{:#}", e))?;

        let embedding = if store.supports_vectors() {
            Some(EmbeddingOutcome::generate(self.embedder.as_ref(), &request.content, self.dimension).await)
        } else {
            None
        };

        if let Some(vector) = embedding.as_ref().and_then(|e| e.vector()) {
            match check_duplicate(store.as_ref(), vector, DEDUP_THRESHOLD).await {
                DedupDecision::Duplicate {
                    existing_id,
                    similarity,
                } => {
                    tracing::info!(%existing_id, similarity, "duplicate learning skipped");
                    return Ok(StoreOutcome::duplicate(existing_id, similarity));
                }
                DedupDecision::Unchecked { reason } => {
                    tracing::warn!(error = %reason, "duplicate check failed, storing anyway");
                }
                DedupDecision::Unique => {}
            }
        }

        let mut metadata = build_metadata(request);
        let mut outcome = StoreOutcome {
            success: true,
            backend: Some(selection.kind),
            used_fallback: selection.used_fallback,
            fallback_reason: selection.reason.clone(),
            scope: Some(placement.scope),
            project_id: placement.project_id.clone(),
            content_length: Some(request.content.chars().count()),
            ..Default::default()
        };

        let vector = match embedding {
            Some(EmbeddingOutcome::Embedded(v)) => {
                outcome.embedding_dim = Some(v.len());
                Some(v)
            }
            Some(EmbeddingOutcome::Pending(reason)) => {
                tracing::warn!(error = %reason, "embedding failed, storing as pending");
                metadata.mark_pending(reason.clone());
                outcome.embedding_pending = true;
                outcome.embedding_error = Some(reason);
                None
            }
            None => None,
        };

        let memory = NewMemory {
            content: request.content.clone(),
            metadata,
            embedding: vector,
            scope: placement.scope,
            project_id: placement.project_id.clone(),
        };
        let id = store.insert(&memory).await.map_err(|e| format!("{:#}", e))?;

        tracing::info!(memory_id = %id, backend = %selection.kind, scope = %placement.scope, "learning stored");
        outcome.memory_id = Some(id);
        Ok(outcome)
    }

    async fn persist_secondary(
        &self,
        request: &StoreRequest,
        placement: &Placement,
        primary: String,
    ) -> Result<StoreOutcome, WriteError> {
        let both = |secondary: anyhow::Error| WriteError::BothBackendsFailed {
            primary: primary.clone(),
            secondary: format!("{:#}", secondary),
        };

        let store = self.backends.open(BackendKind::Sqlite).await.map_err(both)?;

        let mut metadata = build_metadata(request);
        metadata.primary_error = Some(primary.clone());
        let memory = NewMemory {
            content: request.content.clone(),
            metadata,
            embedding: None,
            scope: placement.scope,
            project_id: placement.project_id.clone(),
        };
        let id = store.insert(&memory).await.map_err(both)?;

        tracing::info!(memory_id = %id, "learning stored on secondary after primary failure");
        Ok(StoreOutcome {
            success: true,
            memory_id: Some(id),
            backend: Some(BackendKind::Sqlite),
            used_fallback: true,
            fallback_reason: Some(format!("PostgreSQL error: {}", primary)),
            scope: Some(placement.scope),
            project_id: placement.project_id.clone(),
            content_length: Some(request.content.chars().count()),
            ..Default::default()
        })
    }
}

fn print_outcome(outcome: &StoreOutcome) {
    if outcome.skipped {
        println!("~ Learning skipped: {}", outcome.reason.as_deref().unwrap_or(""));
        if let Some(existing) = &outcome.existing_id {
            println!("  Existing: {}", existing);
        }
        return;
    }
    if !outcome.success {
        println!("✗ Failed to store learning: {}", outcome.error.as_deref().unwrap_or("unknown error"));
        if outcome.queued {
            println!("  Queued for retry (lmem drain)");
        }
        return;
    }

    println!("✓ Learning stored");
    println!("  Memory ID: {}", outcome.memory_id.as_deref().unwrap_or("unknown"));
    if let Some(backend) = outcome.backend {
        println!("  Backend: {}", backend);
    }
    if let Some(scope) = outcome.scope {
        println!("  Scope: {}", scope);
    }
    if let Some(dim) = outcome.embedding_dim {
        println!("  Embedding: {} dims", dim);
    }
    if outcome.embedding_pending {
        println!(
            "  Embedding: pending ({})",
            outcome.embedding_error.as_deref().unwrap_or("unknown error")
        );
    }
    if let Some(reason) = &outcome.fallback_reason {
        println!("  Fallback: {}", reason);
    }
}

/// `lmem store`. Returns whether the outcome was a success.
pub async fn run_store(config: &Config, request: &StoreRequest, json: bool) -> Result<bool> {
    let service = LearningService::from_config(config).await?;
    let outcome = service.store_or_enqueue(request).await;
    if json {
        println!("{}", serde_json::to_string(&outcome)?);
    } else {
        print_outcome(&outcome);
    }
    Ok(outcome.success)
}

/// `lmem drain`.
pub async fn run_drain(config: &Config, json: bool) -> Result<()> {
    let service = LearningService::from_config(config).await?;
    let report = service
        .drain(config.queue.max_retries, config.queue.batch_limit)
        .await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("drain");
        println!("  attempted: {}", report.attempted);
        println!("  succeeded: {}", report.succeeded);
        println!("  failed: {}", report.failed);
        println!("  remaining: {}", report.remaining);
    }
    Ok(())
}
