use anyhow::{bail, Result};
use serde::Serialize;

use learning_memory_core::embedding::{normalize_embedding, Embedder};
use learning_memory_core::store::{BackendKind, MemoryStore};

use crate::backend::{BackendProvider, ConfiguredBackends};
use crate::config::Config;
use crate::embedding::create_embedder;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub total: usize,
    pub updated: usize,
    pub failed: usize,
}

/// Embed records that have no vector (every record with `force`) and
/// write the normalized vector back, clearing their pending markers.
///
/// A record whose embedding or write fails is counted and skipped.
pub async fn backfill(
    store: &dyn MemoryStore,
    embedder: &dyn Embedder,
    dimension: usize,
    force: bool,
    limit: Option<usize>,
) -> Result<BackfillReport> {
    if !store.supports_vectors() {
        bail!("{} store has no vector column to backfill", store.backend());
    }

    let pending = store.pending_embeddings(limit, force).await?;
    let mut report = BackfillReport {
        total: pending.len(),
        ..Default::default()
    };

    for record in pending {
        let vector = match embedder.embed(&record.content).await {
            Ok(native) => normalize_embedding(&native, dimension),
            Err(e) => {
                tracing::warn!(memory_id = %record.id, error = %format!("{:#}", e), "embedding failed");
                report.failed += 1;
                continue;
            }
        };

        match store.set_embedding(&record.id, &vector).await {
            Ok(()) => report.updated += 1,
            Err(e) => {
                tracing::warn!(memory_id = %record.id, error = %format!("{:#}", e), "vector write failed");
                report.failed += 1;
            }
        }
    }

    Ok(report)
}

/// `lmem backfill`: fill in vectors on the primary.
pub async fn run_backfill(
    config: &Config,
    force: bool,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }
    if config.primary.dsn.is_none() {
        bail!("Backfill requires a primary database. Set [primary] dsn or LMEM_DATABASE_URL.");
    }

    let embedder = create_embedder(&config.embedding)?;
    let backends = ConfiguredBackends::new(config);
    let store = backends.open(BackendKind::Postgres).await?;

    let report = backfill(
        store.as_ref(),
        embedder.as_ref(),
        config.embedding.dimension,
        force,
        limit,
    )
    .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("backfill{}", if force { " (force)" } else { "" });
        println!("  model: {}", embedder.model_name());
        println!("  total: {}", report.total);
        println!("  updated: {}", report.updated);
        println!("  failed: {}", report.failed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use learning_memory_core::models::{LearningMetadata, NewMemory, Scope};
    use learning_memory_core::store::memory::InMemoryStore;

    /// Fails for any text containing "boom".
    struct Picky;

    #[async_trait]
    impl Embedder for Picky {
        fn model_name(&self) -> &str {
            "picky"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if text.contains("boom") {
                bail!("provider rejected input");
            }
            Ok(vec![1.0, 0.5])
        }
    }

    async fn seed(store: &InMemoryStore, content: &str, embedding: Option<Vec<f32>>) -> String {
        let mut metadata = LearningMetadata::new("s", Utc::now());
        if embedding.is_none() {
            metadata.mark_pending("provider down");
        }
        store
            .insert(&NewMemory {
                content: content.to_string(),
                metadata,
                embedding,
                scope: Scope::Project,
                project_id: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_backfill_pending_only() {
        let store = InMemoryStore::primary();
        let pending = seed(&store, "needs vector", None).await;
        seed(&store, "boom goes the provider", None).await;
        seed(&store, "already embedded", Some(vec![0.0, 0.0, 0.0, 1.0])).await;

        let report = backfill(&store, &Picky, 4, false, None).await.unwrap();
        assert_eq!(
            report,
            BackfillReport {
                total: 2,
                updated: 1,
                failed: 1
            }
        );

        let (metadata, vector, _, _) = store.get(&pending).unwrap();
        assert_eq!(vector, Some(vec![1.0, 0.5, 0.0, 0.0]));
        assert!(!metadata.is_pending());
        assert!(metadata.embedding_error.is_none());
    }

    #[tokio::test]
    async fn test_backfill_force_and_limit() {
        let store = InMemoryStore::primary();
        seed(&store, "a", Some(vec![0.1, 0.1])).await;
        seed(&store, "b", Some(vec![0.2, 0.2])).await;
        seed(&store, "c", None).await;

        let report = backfill(&store, &Picky, 2, true, Some(2)).await.unwrap();
        assert_eq!(report.total, 2);
        assert_eq!(report.updated, 2);
    }

    #[tokio::test]
    async fn test_backfill_requires_vectors() {
        let store = InMemoryStore::secondary();
        assert!(backfill(&store, &Picky, 2, false, None).await.is_err());
    }
}
