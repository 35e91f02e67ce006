//! Embedding trait, the width normalizer, and vector utilities.
//!
//! Defines the [`Embedder`] trait that all embedding backends implement,
//! the two-case [`EmbeddingOutcome`] threaded through the write pipeline,
//! and pure helpers for fitting vectors to a fixed column width and
//! comparing them.
//!
//! Concrete providers (OpenAI, Ollama, fastembed) live in the
//! `learning-memory` app crate.

use async_trait::async_trait;

/// Trait for embedding providers.
///
/// `dims` is the provider-native width. Vectors are fitted to the
/// configured storage width with [`normalize_embedding`] before they
/// reach a store.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the native embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a single text.
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
}

/// Result of the embedding step of a write.
///
/// A provider failure never aborts a write; it turns into `Pending` and
/// the record is stored without a vector.
#[derive(Debug, Clone, PartialEq)]
pub enum EmbeddingOutcome {
    /// Normalized to the target dimension.
    Embedded(Vec<f32>),
    /// Provider failed; carries the error text.
    Pending(String),
}

impl EmbeddingOutcome {
    /// Embed `text` and fit the result to `dimension`.
    pub async fn generate(embedder: &dyn Embedder, text: &str, dimension: usize) -> Self {
        match embedder.embed(text).await {
            Ok(native) => EmbeddingOutcome::Embedded(normalize_embedding(&native, dimension)),
            Err(e) => EmbeddingOutcome::Pending(format!("{:#}", e)),
        }
    }

    pub fn vector(&self) -> Option<&[f32]> {
        match self {
            EmbeddingOutcome::Embedded(v) => Some(v),
            EmbeddingOutcome::Pending(_) => None,
        }
    }
}

/// Fit an embedding of any native length to exactly `dimension` components.
///
/// Longer inputs keep their first `dimension` components (truncation, not
/// resampling). Shorter inputs are right-padded with `0.0`. An empty
/// input yields an all-zero vector.
///
/// # Example
///
/// ```rust
/// use learning_memory_core::embedding::normalize_embedding;
///
/// assert_eq!(normalize_embedding(&[1.0, 2.0, 3.0], 2), vec![1.0, 2.0]);
/// assert_eq!(normalize_embedding(&[1.0], 3), vec![1.0, 0.0, 0.0]);
/// ```
pub fn normalize_embedding(native: &[f32], dimension: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(dimension);
    out.extend(native.iter().take(dimension).copied());
    out.resize(dimension, 0.0);
    out
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero-magnitude vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedEmbedder(Result<Vec<f32>, String>);

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dims(&self) -> usize {
            4
        }
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            self.0.clone().map_err(|e| anyhow::anyhow!(e))
        }
    }

    #[test]
    fn test_normalize_truncates_keeping_prefix() {
        let native: Vec<f32> = (0..10).map(|i| i as f32).collect();
        let out = normalize_embedding(&native, 4);
        assert_eq!(out, vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_normalize_pads_with_exact_zeros() {
        let out = normalize_embedding(&[0.5, -0.5], 5);
        assert_eq!(out.len(), 5);
        assert_eq!(&out[..2], &[0.5, -0.5]);
        assert!(out[2..].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_normalize_equal_length_is_identity() {
        let native = vec![0.1, 0.2, 0.3];
        assert_eq!(normalize_embedding(&native, 3), native);
    }

    #[test]
    fn test_normalize_empty_input() {
        assert_eq!(normalize_embedding(&[], 3), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_normalize_length_property() {
        for n in [0usize, 1, 7, 384, 1536] {
            for d in [1usize, 8, 384, 1024] {
                let native = vec![1.0f32; n];
                let out = normalize_embedding(&native, d);
                assert_eq!(out.len(), d, "n={} d={}", n, d);
                let kept = n.min(d);
                assert!(out[..kept].iter().all(|v| *v == 1.0));
                assert!(out[kept..].iter().all(|v| *v == 0.0));
            }
        }
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[tokio::test]
    async fn test_generate_normalizes() {
        let embedder = FixedEmbedder(Ok(vec![1.0, 2.0, 3.0, 4.0]));
        let outcome = EmbeddingOutcome::generate(&embedder, "x", 6).await;
        assert_eq!(
            outcome,
            EmbeddingOutcome::Embedded(vec![1.0, 2.0, 3.0, 4.0, 0.0, 0.0])
        );
    }

    #[tokio::test]
    async fn test_generate_failure_is_pending() {
        let embedder = FixedEmbedder(Err("model not loaded".to_string()));
        let outcome = EmbeddingOutcome::generate(&embedder, "x", 6).await;
        match outcome {
            EmbeddingOutcome::Pending(reason) => assert!(reason.contains("model not loaded")),
            other => panic!("expected pending, got {:?}", other),
        }
    }
}
