//! Directory layout for the global and project memory roots.
//!
//! Both roots share one shape:
//!
//! ```text
//! <root>/core/{preferences,rules,persona}/     (global root only)
//! <root>/sessions/<YYYY-MM-DD>/
//! <root>/short_term/{tasks,notes,contexts}/
//! <root>/long_term/{projects,knowledge,decisions}/
//! <root>/archive/<YYYY-MM>/<tier>/
//! <root>/index.db
//! <root>/vectors.db
//! ```

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::memory::types::{Category, Scope, Tier};

/// Extension of every memory and session document.
pub const DOCUMENT_EXT: &str = "md";

/// Resolves per-scope directories and document file names.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    global_root: PathBuf,
    project_root: Option<PathBuf>,
    project_dir: String,
    max_title_len: usize,
}

impl StorageLayout {
    pub fn new(global_root: impl Into<PathBuf>, project_dir: impl Into<String>, max_title_len: usize) -> Self {
        Self {
            global_root: global_root.into(),
            project_root: None,
            project_dir: project_dir.into(),
            max_title_len,
        }
    }

    pub fn from_config(config: &crate::config::StrataConfig) -> Self {
        Self::new(
            config.resolved_global_root(),
            config.storage.project_dir.clone(),
            config.storage.max_title_len,
        )
    }

    /// Same layout bound to a different (or no) project root.
    pub fn with_project(&self, project_root: Option<PathBuf>) -> Self {
        Self {
            project_root,
            ..self.clone()
        }
    }

    pub fn global_root(&self) -> &Path {
        &self.global_root
    }

    /// The detected project root itself (not the data directory inside it).
    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    /// Data directory inside the project root, e.g. `<project>/.strata`.
    pub fn project_data_root(&self) -> Option<PathBuf> {
        self.project_root.as_ref().map(|p| p.join(&self.project_dir))
    }

    /// Root directory for `scope`. Project scope needs an active project.
    pub fn root(&self, scope: Scope) -> Result<PathBuf> {
        match scope {
            Scope::Global => Ok(self.global_root.clone()),
            Scope::Project => self
                .project_data_root()
                .ok_or_else(|| Error::invalid("layout_root", "no active project for project scope")),
        }
    }

    /// Scopes that currently have a root.
    pub fn scopes(&self) -> Vec<Scope> {
        if self.project_root.is_some() {
            vec![Scope::Global, Scope::Project]
        } else {
            vec![Scope::Global]
        }
    }

    pub fn core_dir(&self) -> PathBuf {
        self.global_root.join("core")
    }

    pub fn sessions_dir(&self, scope: Scope) -> Result<PathBuf> {
        Ok(self.root(scope)?.join("sessions"))
    }

    /// Date-partitioned session folder, `sessions/<YYYY-MM-DD>`.
    pub fn session_day_dir(&self, scope: Scope, date: DateTime<Utc>) -> Result<PathBuf> {
        Ok(self.sessions_dir(scope)?.join(date.format("%Y-%m-%d").to_string()))
    }

    pub fn short_term_dir(&self, scope: Scope, category: Category) -> Result<PathBuf> {
        Ok(self.root(scope)?.join("short_term").join(category.dir_name()))
    }

    pub fn long_term_dir(&self, scope: Scope, category: Category) -> Result<PathBuf> {
        Ok(self.root(scope)?.join("long_term").join(category.dir_name()))
    }

    pub fn archive_dir(&self, scope: Scope, tier: Tier, date: DateTime<Utc>) -> Result<PathBuf> {
        Ok(self
            .root(scope)?
            .join("archive")
            .join(date.format("%Y-%m").to_string())
            .join(tier.as_str()))
    }

    /// Directory a memory of `category` lives in. Core always resolves globally.
    pub fn dir_for(&self, category: Category, scope: Scope) -> Result<PathBuf> {
        match category.tier() {
            Tier::Core => Ok(self.core_dir().join(category.dir_name())),
            Tier::Session => self.sessions_dir(scope),
            Tier::ShortTerm => self.short_term_dir(scope, category),
            Tier::LongTerm => self.long_term_dir(scope, category),
        }
    }

    pub fn index_db_path(&self, scope: Scope) -> Result<PathBuf> {
        Ok(self.root(scope)?.join("index.db"))
    }

    pub fn vector_db_path(&self, scope: Scope) -> Result<PathBuf> {
        Ok(self.root(scope)?.join("vectors.db"))
    }

    /// Create every tier directory for `scope`. Idempotent.
    pub fn ensure_dirs(&self, scope: Scope) -> Result<()> {
        let root = self.root(scope)?;
        let mut dirs = vec![root.join("sessions"), root.join("archive")];
        if scope == Scope::Global {
            for cat in Category::for_tier(Tier::Core) {
                dirs.push(self.core_dir().join(cat.dir_name()));
            }
        }
        for tier in [Tier::ShortTerm, Tier::LongTerm] {
            for cat in Category::for_tier(tier) {
                dirs.push(self.dir_for(*cat, scope)?);
            }
        }
        for dir in dirs {
            std::fs::create_dir_all(&dir).map_err(|e| Error::io("ensure_dirs", &dir, e))?;
        }
        Ok(())
    }

    /// `<YYYY-MM-DD>_<category>_<slug>.md`, falling back to an id fragment.
    pub fn file_name(&self, date: DateTime<Utc>, category: &str, title: &str, id: &str) -> String {
        let slug = match sanitize_title(title, self.max_title_len) {
            s if s.is_empty() => id_fragment(id),
            s => s,
        };
        format!(
            "{}_{}_{}.{}",
            date.format("%Y-%m-%d"),
            category,
            slug,
            DOCUMENT_EXT
        )
    }

    /// Same as [`file_name`](Self::file_name) with `-<id8>` appended to the stem.
    pub fn unique_file_name(&self, date: DateTime<Utc>, category: &str, title: &str, id: &str) -> String {
        let base = self.file_name(date, category, title, id);
        let stem = base.trim_end_matches(&format!(".{DOCUMENT_EXT}"));
        format!("{stem}-{}.{DOCUMENT_EXT}", id_fragment(id))
    }
}

/// Lowercase, collapse non-alphanumeric runs into `-`, trim, cap at `max_len` chars.
pub fn sanitize_title(title: &str, max_len: usize) -> String {
    let mut out = String::new();
    let mut pending_dash = false;
    for ch in title.chars() {
        if ch.is_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.extend(ch.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    let capped: String = out.chars().take(max_len).collect();
    capped.trim_matches('-').to_string()
}

fn id_fragment(id: &str) -> String {
    let cleaned: String = id.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    cleaned.chars().take(8).collect()
}

/// Walk upward from `start` looking for any marker. Falls back to `start`.
pub fn detect_project_root(start: &Path, markers: &[String]) -> PathBuf {
    let mut current = Some(start);
    while let Some(dir) = current {
        if markers.iter().any(|m| dir.join(m).exists()) {
            return dir.to_path_buf();
        }
        current = dir.parent();
    }
    start.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn layout() -> StorageLayout {
        StorageLayout::new("/home/u/.strata", ".strata", 40)
    }

    #[test]
    fn sanitize_collapses_and_caps() {
        assert_eq!(sanitize_title("Use  Vim, always!", 40), "use-vim-always");
        assert_eq!(sanitize_title("!!!", 40), "");
        assert_eq!(sanitize_title("我习惯使用 vim", 40), "我习惯使用-vim");
        assert_eq!(sanitize_title("abcdef ghij", 7), "abcdef");
    }

    #[test]
    fn file_name_falls_back_to_id() {
        let date = Utc.with_ymd_and_hms(2026, 3, 4, 10, 0, 0).unwrap();
        let l = layout();
        assert_eq!(
            l.file_name(date, "task", "Ship the release", "0192ab-cdef-7777"),
            "2026-03-04_task_ship-the-release.md"
        );
        assert_eq!(
            l.file_name(date, "note", "???", "0192ab-cdef-7777"),
            "2026-03-04_note_0192abcd.md"
        );
        assert_eq!(
            l.unique_file_name(date, "task", "Ship", "0192ab-cdef-7777"),
            "2026-03-04_task_ship-0192abcd.md"
        );
    }

    #[test]
    fn project_scope_requires_project() {
        let l = layout();
        assert!(l.root(Scope::Project).is_err());
        assert_eq!(l.scopes(), vec![Scope::Global]);

        let p = l.with_project(Some(PathBuf::from("/work/app")));
        assert_eq!(p.root(Scope::Project).unwrap(), PathBuf::from("/work/app/.strata"));
        assert_eq!(
            p.dir_for(Category::Task, Scope::Project).unwrap(),
            PathBuf::from("/work/app/.strata/short_term/tasks")
        );
        // core ignores scope
        assert_eq!(
            p.dir_for(Category::Rule, Scope::Project).unwrap(),
            PathBuf::from("/home/u/.strata/core/rules")
        );
    }

    #[test]
    fn archive_is_month_and_tier_partitioned() {
        let date = Utc.with_ymd_and_hms(2026, 3, 4, 10, 0, 0).unwrap();
        assert_eq!(
            layout().archive_dir(Scope::Global, Tier::ShortTerm, date).unwrap(),
            PathBuf::from("/home/u/.strata/archive/2026-03/short_term")
        );
    }

    #[test]
    fn detect_walks_upward_to_marker() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("repo");
        let nested = root.join("src").join("deep");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();

        let markers = vec![".git".to_string()];
        assert_eq!(detect_project_root(&nested, &markers), root);
    }

    #[test]
    fn detect_falls_back_to_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let markers = vec!["definitely-not-a-marker-file".to_string()];
        assert_eq!(detect_project_root(dir.path(), &markers), dir.path());
    }

    #[test]
    fn ensure_dirs_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let l = StorageLayout::new(dir.path(), ".strata", 40);
        l.ensure_dirs(Scope::Global).unwrap();
        l.ensure_dirs(Scope::Global).unwrap();
        assert!(dir.path().join("short_term/tasks").is_dir());
        assert!(dir.path().join("long_term/decisions").is_dir());
        assert!(dir.path().join("core/preferences").is_dir());
        assert!(dir.path().join("archive").is_dir());
    }
}
