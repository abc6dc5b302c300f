#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use strata::completion::Summarizer;
use strata::config::StrataConfig;
use strata::embedding::{EmbeddingProvider, HashEmbedding};
use strata::engine::{EngineOptions, MemoryEngine};
use strata::error::{Error, Result};
use strata::memory::roots::StoreBackend;
use strata::memory::types::SessionMessage;

pub const DIM: usize = 64;

/// Config rooted in a throwaway directory with a small vector dimension.
pub fn test_config(dir: &Path) -> StrataConfig {
    let mut config = StrataConfig::with_global_root(dir.join("global"));
    config.embedding.dimension = DIM;
    config.embedding.retry_base_ms = 1;
    config
}

pub fn options() -> EngineOptions {
    EngineOptions {
        backend: StoreBackend::Sqlite,
        background: false,
        ..EngineOptions::default()
    }
}

/// Engine on SQLite stores with the hashing embedder and no background task.
pub fn test_engine(dir: &Path) -> MemoryEngine {
    MemoryEngine::open(test_config(dir), options()).unwrap()
}

pub fn engine_with(config: StrataConfig, options: EngineOptions) -> MemoryEngine {
    MemoryEngine::open(config, options).unwrap()
}

/// A directory that looks like a project checkout.
pub fn project_dir(base: &Path, name: &str) -> PathBuf {
    let dir = base.join(name);
    std::fs::create_dir_all(dir.join(".git")).unwrap();
    dir
}

/// Generate a deterministic embedding with a spike at position `seed`.
pub fn test_embedding(seed: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    v[seed % DIM] = 1.0;
    v
}

/// Hashing embedder that fails its first `failures` calls.
pub struct FlakyEmbedding {
    inner: HashEmbedding,
    failures: AtomicUsize,
}

impl FlakyEmbedding {
    pub fn new(failures: usize) -> Self {
        Self {
            inner: HashEmbedding::new(DIM),
            failures: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FlakyEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(Error::upstream("embed", "provider offline"));
        }
        self.inner.embed(text).await
    }

    fn dimensions(&self) -> usize {
        DIM
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

/// Provider that never answers successfully.
pub struct DeadEmbedding;

#[async_trait]
impl EmbeddingProvider for DeadEmbedding {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(Error::upstream("embed", "provider offline"))
    }

    fn dimensions(&self) -> usize {
        DIM
    }
}

/// Summarizer returning a fixed text, or failing when `None`.
pub struct FixedSummarizer(pub Option<&'static str>);

#[async_trait]
impl Summarizer for FixedSummarizer {
    async fn summarize(&self, messages: &[SessionMessage]) -> Result<String> {
        assert!(!messages.is_empty(), "summarizer called with nothing to summarize");
        self.0
            .map(str::to_string)
            .ok_or_else(|| Error::upstream("summarize", "completion unavailable"))
    }
}

pub fn summarizer(text: Option<&'static str>) -> Option<Arc<dyn Summarizer>> {
    Some(Arc::new(FixedSummarizer(text)))
}
