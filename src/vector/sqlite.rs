//! `vectors.db`: one row per embedded memory, scanned linearly on search.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::{check_dimension, from_bytes, l2_norm, rank_by_cosine, to_bytes, VectorIndex};
use crate::db;
use crate::error::{Error, ErrorKind, Result};

pub struct SqliteVectorIndex {
    conn: Mutex<Connection>,
    dimension: usize,
}

impl SqliteVectorIndex {
    pub fn open(path: impl AsRef<Path>, dimension: usize) -> Result<Self> {
        let conn = db::open_vector_database(path, dimension)?;
        Ok(Self {
            conn: Mutex::new(conn),
            dimension,
        })
    }

    pub fn open_in_memory(dimension: usize) -> Result<Self> {
        let conn = db::open_memory_vectors(dimension)?;
        Ok(Self {
            conn: Mutex::new(conn),
            dimension,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::new(ErrorKind::Storage, "vector_lock", "connection lock poisoned"))
    }
}

impl VectorIndex for SqliteVectorIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn upsert(&self, id: &str, vector: &[f32]) -> Result<()> {
        check_dimension("vector_upsert", self.dimension, vector)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO memory_vectors (id, embedding, dimension, norm, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                embedding = excluded.embedding,
                dimension = excluded.dimension,
                norm = excluded.norm,
                updated_at = excluded.updated_at",
            params![
                id,
                to_bytes(vector),
                vector.len() as i64,
                l2_norm(vector) as f64,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| Error::storage("vector_upsert", e))?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Vec<f32>>> {
        let conn = self.conn()?;
        let blob: Option<Vec<u8>> = conn
            .query_row(
                "SELECT embedding FROM memory_vectors WHERE id = ?1",
                [id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::storage("vector_get", e))?;
        blob.map(|b| from_bytes(&b)).transpose()
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn
            .execute("DELETE FROM memory_vectors WHERE id = ?1", [id])
            .map_err(|e| Error::storage("vector_delete", e))?;
        Ok(n > 0)
    }

    fn search(&self, query: &[f32], top_k: usize, min_similarity: f32) -> Result<Vec<(String, f32)>> {
        check_dimension("vector_search", self.dimension, query)?;
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, embedding, norm FROM memory_vectors WHERE dimension = ?1")
            .map_err(|e| Error::storage("vector_search", e))?;
        let raw = stmt
            .query_map([self.dimension as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, f64>(2)?,
                ))
            })
            .map_err(|e| Error::storage("vector_search", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::storage("vector_search", e))?;

        let mut rows = Vec::with_capacity(raw.len());
        for (id, blob, norm) in raw {
            match from_bytes(&blob) {
                Ok(v) => rows.push((id, v, norm as f32)),
                Err(e) => tracing::warn!(id = %id, error = %e, "skipping corrupt vector row"),
            }
        }
        Ok(rank_by_cosine(query, rows, top_k, min_similarity))
    }

    fn count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM memory_vectors", [], |row| row.get(0))
            .map_err(|e| Error::storage("vector_count", e))?;
        Ok(n as usize)
    }

    fn ids(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id FROM memory_vectors ORDER BY id")
            .map_err(|e| Error::storage("vector_ids", e))?;
        let ids = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| Error::storage("vector_ids", e))?
            .collect::<rusqlite::Result<Vec<String>>>()
            .map_err(|e| Error::storage("vector_ids", e))?;
        Ok(ids)
    }
}
