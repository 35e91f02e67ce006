//! Deduplication gate.
//!
//! Before a record with a vector is persisted, its single nearest
//! neighbor is looked up. At or above [`DEDUP_THRESHOLD`] the write is
//! skipped. The gate fails open: a failed lookup lets the write through.
//!
//! The check and the later insert are not atomic. Two writers racing on
//! near-identical content can both pass the gate and both persist.

use crate::store::{MemoryStore, Visibility};

/// Similarity at or above which a candidate counts as a duplicate.
pub const DEDUP_THRESHOLD: f32 = 0.92;

#[derive(Debug, Clone, PartialEq)]
pub enum DedupDecision {
    /// No neighbor close enough; persist.
    Unique,
    /// Skip the write.
    Duplicate { existing_id: String, similarity: f32 },
    /// The lookup failed; persist anyway.
    Unchecked { reason: String },
}

impl DedupDecision {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, DedupDecision::Duplicate { .. })
    }
}

/// Run the gate for `candidate` against every record in `store`.
pub async fn check_duplicate(
    store: &dyn MemoryStore,
    candidate: &[f32],
    threshold: f32,
) -> DedupDecision {
    match store.nearest(candidate, 1, &Visibility::all()).await {
        Ok(hits) => match hits.into_iter().next() {
            Some(top) if top.similarity >= threshold => DedupDecision::Duplicate {
                existing_id: top.id,
                similarity: top.similarity,
            },
            _ => DedupDecision::Unique,
        },
        Err(e) => DedupDecision::Unchecked {
            reason: format!("{:#}", e),
        },
    }
}
