//! Deterministic feature-hashing embedder.
//!
//! Each lowercase term and adjacent term pair is hashed into one of `dimension`
//! buckets with a sign bit; the bucket counts are L2-normalized. Texts sharing
//! vocabulary land close together, which is enough for offline use and tests.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::vector::normalize;

#[derive(Debug, Clone)]
pub struct HashEmbedding {
    dimension: usize,
}

impl HashEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    /// Synchronous core, shared by the async trait methods.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        if self.dimension == 0 {
            return v;
        }
        let terms: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect();

        for term in &terms {
            self.accumulate(&mut v, term.as_bytes(), 1.0);
        }
        for pair in terms.windows(2) {
            let joined = format!("{} {}", pair[0], pair[1]);
            self.accumulate(&mut v, joined.as_bytes(), 0.5);
        }
        normalize(&mut v);
        v
    }

    fn accumulate(&self, v: &mut [f32], feature: &[u8], weight: f32) {
        let digest = Sha256::digest(feature);
        let bucket = u64::from_le_bytes([
            digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
        ]) % self.dimension as u64;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        v[bucket as usize] += sign * weight;
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.dimension == 0 {
            return Err(Error::invalid("hash_embed", "dimension must be positive"));
        }
        Ok(self.embed_text(text))
    }

    fn dimensions(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hash"
    }
}
