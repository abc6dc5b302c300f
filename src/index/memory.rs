//! In-process metadata index without FTS, used as a test double.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::{keywords, IndexFilter, IndexRow, MetadataIndex};
use crate::error::{Error, ErrorKind, Result};
use crate::memory::types::Status;

#[derive(Default)]
pub struct InMemoryIndex {
    rows: Mutex<HashMap<String, IndexRow>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> Result<MutexGuard<'_, HashMap<String, IndexRow>>> {
        self.rows
            .lock()
            .map_err(|_| Error::new(ErrorKind::Storage, "index_lock", "lock poisoned"))
    }
}

fn newest_first(rows: &mut [IndexRow]) {
    rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
}

impl MetadataIndex for InMemoryIndex {
    fn has_fts(&self) -> bool {
        false
    }

    fn upsert(&self, row: &IndexRow) -> Result<()> {
        let mut rows = self.rows()?;
        rows.retain(|id, existing| id == &row.id || existing.file_path != row.file_path);
        rows.insert(row.id.clone(), row.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<IndexRow>> {
        Ok(self.rows()?.get(id).cloned())
    }

    fn get_by_path(&self, path: &Path) -> Result<Option<IndexRow>> {
        Ok(self.rows()?.values().find(|r| r.file_path == path).cloned())
    }

    fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.rows()?.remove(id).is_some())
    }

    fn query(&self, filter: &IndexFilter) -> Result<Vec<IndexRow>> {
        let mut out: Vec<IndexRow> = self.rows()?.values().filter(|r| filter.matches(r)).cloned().collect();
        newest_first(&mut out);
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    fn expired(&self, now: DateTime<Utc>) -> Result<Vec<IndexRow>> {
        let mut out: Vec<IndexRow> = self
            .rows()?
            .values()
            .filter(|r| r.status == Status::Active && r.is_expired(now))
            .cloned()
            .collect();
        out.sort_by_key(|r| r.expires_at);
        Ok(out)
    }

    fn search(&self, query: &str, filter: &IndexFilter, limit: usize) -> Result<Vec<IndexRow>> {
        let terms = keywords(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let mut out: Vec<IndexRow> = self
            .rows()?
            .values()
            .filter(|r| filter.matches(r))
            .filter(|r| {
                let title = r.title.to_lowercase();
                terms.iter().any(|t| {
                    title.contains(t.as_str())
                        || r.category.as_str().contains(t.as_str())
                        || r.tags.iter().any(|tag| tag.to_lowercase().contains(t.as_str()))
                })
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        out.truncate(limit);
        Ok(out)
    }

    fn record_access(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut rows = self.rows()?;
        let row = rows
            .get_mut(id)
            .ok_or_else(|| Error::not_found("index_record_access", format!("no index row for {id}")))?;
        row.access_count = row.access_count.saturating_add(1);
        row.accessed_at = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::{Category, Scope, Tier};
    use std::path::PathBuf;

    fn row(id: &str, title: &str, path: &str) -> IndexRow {
        let now = Utc::now();
        IndexRow {
            id: id.into(),
            tier: Tier::LongTerm,
            scope: Scope::Global,
            category: Category::Knowledge,
            title: title.into(),
            tags: vec!["Docker".into()],
            related: vec![],
            project_path: None,
            status: Status::Active,
            importance: 3,
            access_count: 0,
            content_hash: "h".into(),
            expires_at: None,
            created_at: now,
            updated_at: now,
            accessed_at: None,
            file_path: PathBuf::from(path),
        }
    }

    #[test]
    fn behaves_like_sqlite_for_paths_and_search() {
        let idx = InMemoryIndex::new();
        assert!(!idx.has_fts());
        idx.upsert(&row("a", "Compose files", "/x.md")).unwrap();
        idx.upsert(&row("b", "Other", "/x.md")).unwrap();
        assert!(idx.get("a").unwrap().is_none());
        assert_eq!(idx.get_by_path(Path::new("/x.md")).unwrap().unwrap().id, "b");

        let hits = idx.search("docker", &IndexFilter::default(), 5).unwrap();
        assert_eq!(hits.len(), 1);
        idx.record_access("b", Utc::now()).unwrap();
        assert_eq!(idx.get("b").unwrap().unwrap().access_count, 1);
    }
}
