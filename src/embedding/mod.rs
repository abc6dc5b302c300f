//! Text-to-vector embedding capability.
//!
//! [`EmbeddingProvider`] is the narrow contract the engine consumes; remote
//! clients live outside this crate. [`local::HashEmbedding`] is a deterministic
//! offline provider. [`gateway::EmbeddingGateway`] adds batching, retry, a
//! cache and the offline queue on top of any provider.

pub mod gateway;
pub mod local;

use async_trait::async_trait;

use crate::error::Result;

pub use gateway::{EmbedItem, EmbedOutcome, EmbeddingGateway};
pub use local::HashEmbedding;

/// Trait for embedding text into fixed-dimension vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts. Implementations may override for batched calls.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Number of dimensions every returned vector has.
    fn dimensions(&self) -> usize;

    /// Provider name, for logs.
    fn name(&self) -> &str {
        "embedding"
    }
}
