//! In-process vector store, used as a test double and for ephemeral engines.

use std::collections::HashMap;
use std::sync::Mutex;

use super::{check_dimension, l2_norm, rank_by_cosine, VectorIndex};
use crate::error::{Error, Result};

pub struct InMemoryVectorIndex {
    dimension: usize,
    rows: Mutex<HashMap<String, (Vec<f32>, f32)>>,
}

impl InMemoryVectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            rows: Mutex::new(HashMap::new()),
        }
    }

    fn rows(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, (Vec<f32>, f32)>>> {
        self.rows
            .lock()
            .map_err(|_| Error::new(crate::error::ErrorKind::Storage, "vector_lock", "lock poisoned"))
    }
}

impl VectorIndex for InMemoryVectorIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn upsert(&self, id: &str, vector: &[f32]) -> Result<()> {
        check_dimension("vector_upsert", self.dimension, vector)?;
        self.rows()?
            .insert(id.to_string(), (vector.to_vec(), l2_norm(vector)));
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Vec<f32>>> {
        Ok(self.rows()?.get(id).map(|(v, _)| v.clone()))
    }

    fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.rows()?.remove(id).is_some())
    }

    fn search(&self, query: &[f32], top_k: usize, min_similarity: f32) -> Result<Vec<(String, f32)>> {
        check_dimension("vector_search", self.dimension, query)?;
        let rows = self.rows()?;
        let snapshot = rows
            .iter()
            .map(|(id, (v, norm))| (id.clone(), v.clone(), *norm));
        Ok(rank_by_cosine(query, snapshot, top_k, min_similarity))
    }

    fn count(&self) -> Result<usize> {
        Ok(self.rows()?.len())
    }

    fn ids(&self) -> Result<Vec<String>> {
        Ok(self.rows()?.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_dimension() {
        let idx = InMemoryVectorIndex::new(3);
        assert!(idx.upsert("a", &[1.0, 0.0]).is_err());
        idx.upsert("a", &[1.0, 0.0, 0.0]).unwrap();
        assert_eq!(idx.count().unwrap(), 1);
        assert!(idx.search(&[1.0], 5, 0.0).is_err());
    }

    #[test]
    fn search_and_delete() {
        let idx = InMemoryVectorIndex::new(2);
        idx.upsert("x", &[1.0, 0.0]).unwrap();
        idx.upsert("y", &[0.0, 1.0]).unwrap();
        let hits = idx.search(&[0.9, 0.1], 1, 0.0).unwrap();
        assert_eq!(hits[0].0, "x");
        assert!(idx.delete("x").unwrap());
        assert!(!idx.delete("x").unwrap());
        assert_eq!(idx.ids().unwrap(), vec!["y".to_string()]);
    }
}
