#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;

use learning_memory::backend::BackendProvider;
use learning_memory::learn::LearningService;
use learning_memory_core::embedding::Embedder;
use learning_memory_core::queue::memory::InMemoryRetryQueue;
use learning_memory_core::store::memory::InMemoryStore;
use learning_memory_core::store::{BackendKind, MemoryStore};

pub const DIMS: usize = 64;

/// Hashes character trigrams into a fixed-width count vector. Identical
/// text gives identical vectors; unrelated text lands far apart.
pub struct TrigramEmbedder;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf29ce484222325, |h, b| {
        (h ^ *b as u64).wrapping_mul(0x100000001b3)
    })
}

#[async_trait]
impl Embedder for TrigramEmbedder {
    fn model_name(&self) -> &str {
        "trigram-test"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let chars: Vec<char> = format!("  {}  ", text.to_lowercase()).chars().collect();
        let mut v = vec![0.0f32; DIMS];
        for w in chars.windows(3) {
            let gram: String = w.iter().collect();
            v[(fnv1a(gram.as_bytes()) % DIMS as u64) as usize] += 1.0;
        }
        Ok(v)
    }
}

/// Always fails, like a provider that is down.
pub struct DownEmbedder;

#[async_trait]
impl Embedder for DownEmbedder {
    fn model_name(&self) -> &str {
        "down"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        bail!("connection refused")
    }
}

/// Backends over in-memory stores, with a switch for primary reachability.
pub struct FakeBackends {
    pub primary: Arc<InMemoryStore>,
    pub secondary: Arc<InMemoryStore>,
    primary_view: Arc<dyn MemoryStore>,
    pub configured: bool,
    reachable: AtomicBool,
}

impl FakeBackends {
    /// A configured, reachable primary.
    pub fn new() -> Self {
        let primary = Arc::new(InMemoryStore::primary());
        Self {
            primary_view: primary.clone(),
            primary,
            secondary: Arc::new(InMemoryStore::secondary()),
            configured: true,
            reachable: AtomicBool::new(true),
        }
    }

    /// Serve `view` in place of the primary store.
    pub fn with_primary_view(mut self, view: Arc<dyn MemoryStore>) -> Self {
        self.primary_view = view;
        self
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }
}

#[async_trait]
impl BackendProvider for FakeBackends {
    fn primary_configured(&self) -> bool {
        self.configured
    }

    async fn primary_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    fn default_backend(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    async fn open(&self, kind: BackendKind) -> Result<Arc<dyn MemoryStore>> {
        Ok(match kind {
            BackendKind::Postgres => self.primary_view.clone(),
            BackendKind::Sqlite => self.secondary.clone() as Arc<dyn MemoryStore>,
        })
    }
}

pub struct Harness {
    pub backends: Arc<FakeBackends>,
    pub queue: Arc<InMemoryRetryQueue>,
    pub service: LearningService,
}

pub fn harness_with(backends: FakeBackends, embedder: Arc<dyn Embedder>) -> Harness {
    let backends = Arc::new(backends);
    let queue = Arc::new(InMemoryRetryQueue::new());
    let service = LearningService::new(backends.clone(), embedder, queue.clone(), DIMS);
    Harness {
        backends,
        queue,
        service,
    }
}

pub fn harness() -> Harness {
    harness_with(FakeBackends::new(), Arc::new(TrigramEmbedder))
}
