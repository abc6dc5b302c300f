//! Short-term tier: tasks, notes and working context that expire.
//!
//! Every record carries an `expires_at` derived from its category's TTL unless
//! the caller supplies one. Expired records are archived with status
//! `expired` by [`ShortTermMemory::cleanup_expired`], never deleted.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use super::roots::Roots;
use super::tier::{bullet, render_section, NewMemory, Section, TierManager, TierStore};
use super::types::{Category, Memory, Scope, Status, Tier};
use crate::config::ShortTermConfig;
use crate::error::Result;

/// Outcome of one expiry sweep.
#[derive(Debug, Default, Serialize)]
pub struct CleanupReport {
    pub expired: Vec<String>,
    pub errors: Vec<String>,
}

pub struct ShortTermMemory {
    store: TierStore,
    config: ShortTermConfig,
}

impl ShortTermMemory {
    pub fn new(roots: Arc<Roots>, config: ShortTermConfig) -> Self {
        Self {
            store: TierStore::new(Tier::ShortTerm, roots),
            config,
        }
    }

    pub fn promotion_threshold(&self) -> u32 {
        self.config.promotion_threshold
    }

    /// TTL applied when the caller gives none.
    pub fn default_ttl(&self, category: Category) -> Duration {
        let hours = match category {
            Category::Task => self.config.task_ttl_hours,
            Category::Context => self.config.context_ttl_hours,
            _ => self.config.note_ttl_hours,
        };
        Duration::hours(hours)
    }

    /// Create a record, filling `expires_at` from the category default when
    /// `new.expires_at` is unset.
    pub fn add(&self, new: NewMemory) -> Result<Memory> {
        let expires_at = new
            .expires_at
            .unwrap_or_else(|| Utc::now() + self.default_ttl(new.category));
        self.store.create(new.expires_at(Some(expires_at)))
    }

    pub fn add_with_ttl(&self, new: NewMemory, ttl: Duration) -> Result<Memory> {
        self.add(new.expires_at(Some(Utc::now() + ttl)))
    }

    pub fn add_task(&self, title: &str, content: &str, scope: Scope) -> Result<Memory> {
        self.add(NewMemory::new(Category::Task, title, content).scope(scope))
    }

    pub fn add_note(&self, title: &str, content: &str, scope: Scope) -> Result<Memory> {
        self.add(NewMemory::new(Category::Note, title, content).scope(scope))
    }

    pub fn add_context(&self, title: &str, content: &str, scope: Scope) -> Result<Memory> {
        self.add(NewMemory::new(Category::Context, title, content).scope(scope))
    }

    pub fn touch(&self, id: &str) -> Result<()> {
        self.store.touch(id)
    }

    /// Active records accessed at least `threshold` times: promotion candidates.
    pub fn high_access(&self, threshold: u32) -> Result<Vec<Memory>> {
        Ok(self
            .store
            .load_active()?
            .into_iter()
            .filter(|m| m.access_count >= threshold)
            .collect())
    }

    /// Active-status records whose expiry has passed.
    pub fn expired(&self) -> Result<Vec<Memory>> {
        let now = Utc::now();
        Ok(self
            .store
            .load_all()?
            .into_iter()
            .filter(|m| m.status == Status::Active && m.is_expired(now))
            .collect())
    }

    /// Archive every expired record with status `expired`. One failure does not
    /// stop the sweep.
    pub fn cleanup_expired(&self) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();
        for mut memory in self.expired()? {
            match self.store.archive_memory(&mut memory, Status::Expired) {
                Ok(()) => {
                    debug!(id = %memory.id, "short-term memory expired");
                    report.expired.push(memory.id);
                }
                Err(e) => {
                    warn!(id = %memory.id, error = %e, "failed to expire memory");
                    report.errors.push(format!("{}: {e}", memory.id));
                }
            }
        }
        Ok(report)
    }

    /// Most recently updated first.
    pub fn recent(&self, limit: usize) -> Result<Vec<Memory>> {
        let mut active = self.store.load_active()?;
        active.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        active.truncate(limit);
        Ok(active)
    }
}

impl TierManager for ShortTermMemory {
    fn store(&self) -> &TierStore {
        &self.store
    }

    fn build_context(&self, max_tokens: usize) -> Result<Section> {
        let recent = self.recent(usize::MAX)?;
        Ok(render_section("Short-Term Memory", &recent, max_tokens, |m| {
            format!("[{}] {}", m.category, bullet(m).trim_start_matches("- "))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::roots::StoreBackend;
    use crate::memory::tier::MemoryPatch;
    use crate::storage::StorageLayout;

    fn short_term() -> (tempfile::TempDir, ShortTermMemory) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path().join("g"), ".strata", 40);
        let roots = Arc::new(Roots::open(layout, StoreBackend::InMemory, 4).unwrap());
        (dir, ShortTermMemory::new(roots, ShortTermConfig::default()))
    }

    #[test]
    fn default_ttl_per_category() {
        let (_dir, st) = short_term();
        let task = st.add_task("Fix login", "token refresh bug", Scope::Global).unwrap();
        let ttl = task.expires_at.unwrap() - task.created_at;
        assert!((ttl - Duration::hours(168)).num_seconds().abs() < 5);
        assert_eq!(st.default_ttl(Category::Note), Duration::hours(72));
        assert_eq!(st.default_ttl(Category::Context), Duration::hours(24));
    }

    #[test]
    fn cleanup_archives_expired_with_expired_status() {
        let (_dir, st) = short_term();
        let gone = st
            .add(NewMemory::new(Category::Note, "old", "stale note").expires_at(Some(Utc::now() - Duration::hours(1))))
            .unwrap();
        let live = st.add_note("fresh", "still relevant", Scope::Global).unwrap();

        assert_eq!(st.load_active().unwrap().len(), 1);
        let report = st.cleanup_expired().unwrap();
        assert_eq!(report.expired, vec![gone.id.clone()]);
        assert!(report.errors.is_empty());
        assert!(!gone.file_path.exists());

        let archived = st.find_by_id(&gone.id).unwrap();
        assert_eq!(archived.status, Status::Expired);
        assert!(archived.file_path.to_string_lossy().contains("archive"));
        assert_eq!(st.load_active().unwrap()[0].id, live.id);
        assert!(st.cleanup_expired().unwrap().expired.is_empty());
    }

    #[test]
    fn high_access_reports_threshold_crossers() {
        let (_dir, st) = short_term();
        let hot = st.add_context("hot", "touched a lot", Scope::Global).unwrap();
        st.add_context("cold", "touched once", Scope::Global).unwrap();
        for _ in 0..st.promotion_threshold() {
            st.touch(&hot.id).unwrap();
        }
        let candidates = st.high_access(st.promotion_threshold()).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, hot.id);
    }

    #[test]
    fn update_can_extend_expiry() {
        let (_dir, st) = short_term();
        let m = st.add_task("t", "c", Scope::Global).unwrap();
        let later = Utc::now() + Duration::days(30);
        let updated = st
            .update(
                &m.id,
                MemoryPatch {
                    expires_at: Some(Some(later)),
                    ..MemoryPatch::default()
                },
            )
            .unwrap();
        assert!(updated.expires_at.unwrap() > m.expires_at.unwrap());
    }

    #[test]
    fn context_lists_category() {
        let (_dir, st) = short_term();
        st.add_task("Ship release", "tag v1.2", Scope::Global).unwrap();
        let section = st.build_context(500).unwrap();
        assert!(section.text.contains("[task] **Ship release**: tag v1.2"));
    }
}
