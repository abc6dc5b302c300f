//! Vector math and the per-root embedding store.
//!
//! Similarity search is a brute-force scan over every stored vector using
//! precomputed norms. That is fine for the tens of thousands of rows this engine
//! targets; a larger deployment would swap the [`VectorIndex`] implementation
//! and leave callers alone.

pub mod memory;
pub mod sqlite;

use crate::error::{Error, Result};

pub use memory::InMemoryVectorIndex;
pub use sqlite::SqliteVectorIndex;

/// Per-root store of embeddings keyed by memory id.
pub trait VectorIndex: Send + Sync {
    /// Dimension every stored vector must have.
    fn dimension(&self) -> usize;

    /// Insert or replace the vector for `id`. Rejects a dimension mismatch.
    fn upsert(&self, id: &str, vector: &[f32]) -> Result<()>;

    fn get(&self, id: &str) -> Result<Option<Vec<f32>>>;

    /// Returns `true` if a row was removed.
    fn delete(&self, id: &str) -> Result<bool>;

    /// Top-`top_k` ids by cosine similarity, at or above `min_similarity`, best first.
    fn search(&self, query: &[f32], top_k: usize, min_similarity: f32) -> Result<Vec<(String, f32)>>;

    fn count(&self) -> Result<usize>;

    fn ids(&self) -> Result<Vec<String>>;
}

/// Reject vectors whose length differs from `expected`.
pub fn check_dimension(op: &'static str, expected: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != expected {
        return Err(Error::invalid(
            op,
            format!("dimension mismatch: expected {expected}, got {}", vector.len()),
        ));
    }
    Ok(())
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity; zero when either vector has zero length or norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    cosine_with_norms(a, l2_norm(a), b, l2_norm(b))
}

/// Cosine similarity when both norms are already known.
pub fn cosine_with_norms(a: &[f32], norm_a: f32, b: &[f32], norm_b: f32) -> f32 {
    if a.len() != b.len() || norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot(a, b) / (norm_a * norm_b)
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Scale `v` to unit length in place. Zero vectors are left untouched.
pub fn normalize(v: &mut [f32]) {
    let norm = l2_norm(v);
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

/// Little-endian `f32` bytes.
pub fn to_bytes(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

pub fn from_bytes(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::invalid(
            "decode_vector",
            format!("byte length {} is not a multiple of 4", bytes.len()),
        ));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Score `(id, vector, norm)` rows against `query`, keep those at or above the
/// threshold, best first, truncated to `top_k`.
pub fn rank_by_cosine<I>(query: &[f32], rows: I, top_k: usize, min_similarity: f32) -> Vec<(String, f32)>
where
    I: IntoIterator<Item = (String, Vec<f32>, f32)>,
{
    let query_norm = l2_norm(query);
    let mut scored: Vec<(String, f32)> = rows
        .into_iter()
        .map(|(id, v, norm)| {
            let sim = cosine_with_norms(query, query_norm, &v, norm);
            (id, sim)
        })
        .filter(|(_, sim)| *sim >= min_similarity)
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn distance_and_normalize() {
        assert!((euclidean_distance(&[0.0, 0.0], &[3.0, 4.0]) - 5.0).abs() < 1e-6);
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        assert!((l2_norm(&v) - 1.0).abs() < 1e-6);
        let mut zero = vec![0.0, 0.0];
        normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[test]
    fn bytes_round_trip() {
        let v = vec![0.5f32, -1.25, 3.0e-7];
        assert_eq!(from_bytes(&to_bytes(&v)).unwrap(), v);
        assert!(from_bytes(&[1, 2, 3]).is_err());
    }

    #[test]
    fn rank_filters_sorts_truncates() {
        let rows = vec![
            ("a".to_string(), vec![1.0, 0.0], 1.0),
            ("b".to_string(), vec![0.7, 0.7], (0.98f32).sqrt()),
            ("c".to_string(), vec![0.0, 1.0], 1.0),
        ];
        let ranked = rank_by_cosine(&[1.0, 0.0], rows, 5, 0.5);
        let ids: Vec<&str> = ranked.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let rows = vec![
            ("a".to_string(), vec![1.0, 0.0], 1.0),
            ("b".to_string(), vec![0.7, 0.7], (0.98f32).sqrt()),
        ];
        assert_eq!(rank_by_cosine(&[1.0, 0.0], rows, 1, 0.0).len(), 1);
    }
}
