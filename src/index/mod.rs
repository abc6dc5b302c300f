//! Metadata index: a denormalized, derived projection of every memory document.
//!
//! Rows never hold content bodies; the document on disk stays authoritative and
//! the syncer repairs rows whenever their hash or path drifts.

pub mod memory;
pub mod sqlite;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::memory::types::{Category, Memory, Scope, Status, Tier};

pub use memory::InMemoryIndex;
pub use sqlite::SqliteIndex;

/// Index projection of a [`Memory`]: every scalar field except the content.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexRow {
    pub id: String,
    pub tier: Tier,
    pub scope: Scope,
    pub category: Category,
    pub title: String,
    pub tags: Vec<String>,
    pub related: Vec<String>,
    pub project_path: Option<String>,
    pub status: Status,
    pub importance: u8,
    pub access_count: u32,
    pub content_hash: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub accessed_at: Option<DateTime<Utc>>,
    pub file_path: PathBuf,
}

impl IndexRow {
    pub fn from_memory(memory: &Memory) -> Self {
        Self {
            id: memory.id.clone(),
            tier: memory.tier,
            scope: memory.scope,
            category: memory.category,
            title: memory.title.clone(),
            tags: memory.tags.clone(),
            related: memory.related.clone(),
            project_path: memory.project_path.clone(),
            status: memory.status,
            importance: memory.importance,
            access_count: memory.access_count,
            content_hash: memory.content_hash.clone(),
            expires_at: memory.expires_at,
            created_at: memory.created_at,
            updated_at: memory.updated_at,
            accessed_at: memory.accessed_at,
            file_path: memory.file_path.clone(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == Status::Active && !self.is_expired(now)
    }
}

/// Conjunctive row filter. `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct IndexFilter {
    pub tier: Option<Tier>,
    pub scope: Option<Scope>,
    pub category: Option<Category>,
    pub status: Option<Status>,
    /// Inclusive lower bound on `created_at`.
    pub created_after: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`.
    pub created_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl IndexFilter {
    pub fn tier(tier: Tier) -> Self {
        Self {
            tier: Some(tier),
            ..Self::default()
        }
    }

    pub fn active(mut self) -> Self {
        self.status = Some(Status::Active);
        self
    }

    pub fn with_scope(mut self, scope: Option<Scope>) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// In-process evaluation, shared by the in-memory index and post-filters.
    pub fn matches(&self, row: &IndexRow) -> bool {
        self.tier.is_none_or(|t| row.tier == t)
            && self.scope.is_none_or(|s| row.scope == s)
            && self.category.is_none_or(|c| row.category == c)
            && self.status.is_none_or(|s| row.status == s)
            && self.created_after.is_none_or(|at| row.created_at >= at)
            && self.created_before.is_none_or(|at| row.created_at < at)
    }
}

/// Per-root metadata store. Implementations serialize writers internally.
pub trait MetadataIndex: Send + Sync {
    /// Whether keyword search runs on FTS5 (probed once at open).
    fn has_fts(&self) -> bool;

    /// Insert or replace the row for `row.id`. A different row holding the same
    /// file path is replaced as well.
    fn upsert(&self, row: &IndexRow) -> Result<()>;

    fn get(&self, id: &str) -> Result<Option<IndexRow>>;

    fn get_by_path(&self, path: &Path) -> Result<Option<IndexRow>>;

    /// Returns `true` if a row was removed.
    fn delete(&self, id: &str) -> Result<bool>;

    /// Rows matching `filter`, newest first.
    fn query(&self, filter: &IndexFilter) -> Result<Vec<IndexRow>>;

    /// Active rows whose `expires_at <= now`.
    fn expired(&self, now: DateTime<Utc>) -> Result<Vec<IndexRow>>;

    /// Keyword search over title, tags and category, restricted by `filter`.
    fn search(&self, keywords: &str, filter: &IndexFilter, limit: usize) -> Result<Vec<IndexRow>>;

    /// Atomically bump the access counter and access timestamp.
    fn record_access(&self, id: &str, at: DateTime<Utc>) -> Result<()>;

    fn all(&self) -> Result<Vec<IndexRow>> {
        self.query(&IndexFilter::default())
    }

    /// Rows whose file path is not in `existing`.
    fn orphans(&self, existing: &HashSet<PathBuf>) -> Result<Vec<IndexRow>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|row| !existing.contains(&row.file_path))
            .collect())
    }

    /// Active row counts per tier.
    fn count_by_tier(&self) -> Result<HashMap<Tier, usize>> {
        let mut counts = HashMap::new();
        for row in self.query(&IndexFilter::default().active())? {
            *counts.entry(row.tier).or_insert(0) += 1;
        }
        Ok(counts)
    }

    fn count(&self) -> Result<usize> {
        Ok(self.all()?.len())
    }
}

/// Split a query into lowercase search terms.
pub fn keywords(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric() && c != '_' && c != '-')
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(tier: Tier, created: DateTime<Utc>) -> IndexRow {
        IndexRow {
            id: "r".into(),
            tier,
            scope: Scope::Global,
            category: Category::for_tier(tier)[0],
            title: "t".into(),
            tags: vec![],
            related: vec![],
            project_path: None,
            status: Status::Active,
            importance: 3,
            access_count: 0,
            content_hash: "h".into(),
            expires_at: None,
            created_at: created,
            updated_at: created,
            accessed_at: None,
            file_path: PathBuf::from("/r.md"),
        }
    }

    #[test]
    fn filter_matches_window_and_tier() {
        let now = Utc::now();
        let r = row(Tier::ShortTerm, now);
        let f = IndexFilter {
            created_after: Some(now - chrono::Duration::hours(1)),
            created_before: Some(now + chrono::Duration::hours(1)),
            ..IndexFilter::tier(Tier::ShortTerm)
        };
        assert!(f.matches(&r));
        assert!(!IndexFilter::tier(Tier::Core).matches(&r));
        let f = IndexFilter {
            created_before: Some(now),
            ..IndexFilter::default()
        };
        assert!(!f.matches(&r));
    }

    #[test]
    fn keywords_split_and_lowercase() {
        assert_eq!(keywords("Rust, tokio-runtime!  SQL"), vec!["rust", "tokio-runtime", "sql"]);
        assert!(keywords("  ?? ").is_empty());
    }
}
