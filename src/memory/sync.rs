//! Reconciles memory documents on disk with each root's index.
//!
//! Documents are authoritative. A pass walks every document under a root
//! (live tiers and the archive; session transcripts are not indexed), then
//! creates, refreshes or skips the matching index row, and finally drops rows
//! whose file is gone together with their vectors. Per-file failures are
//! collected on the report and never abort the pass.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::roots::{Roots, ScopeStores};
use super::types::{Memory, Tier};
use crate::error::{Error, Result};
use crate::index::IndexRow;
use crate::storage::codec::{decode_memory, document_tier};
use crate::storage::{is_document, FileStore};

#[derive(Debug, Default, Serialize)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    /// Long-term ids whose content is new or changed and needs re-embedding.
    pub changed: Vec<String>,
}

impl SyncReport {
    fn merge(&mut self, other: SyncReport) {
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.skipped += other.skipped;
        self.errors.extend(other.errors);
        self.changed.extend(other.changed);
    }

    fn record(&mut self, action: SyncAction, memory_id: &str, tier: Tier) {
        match action {
            SyncAction::Created => {
                self.created += 1;
                if tier == Tier::LongTerm {
                    self.changed.push(memory_id.to_string());
                }
            }
            SyncAction::Updated { content_changed } => {
                self.updated += 1;
                if content_changed && tier == Tier::LongTerm {
                    self.changed.push(memory_id.to_string());
                }
            }
            SyncAction::Skipped => self.skipped += 1,
            SyncAction::Deleted | SyncAction::Ignored => {}
        }
    }
}

/// Read-only audit result.
#[derive(Debug, Default, Serialize)]
pub struct ConsistencyReport {
    /// Documents with no index row.
    pub orphaned_files: Vec<PathBuf>,
    /// Index rows whose document is gone.
    pub orphaned_index: Vec<String>,
    /// Ids whose document hash differs from the indexed hash.
    pub hash_mismatches: Vec<String>,
    pub errors: Vec<String>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.orphaned_files.is_empty() && self.orphaned_index.is_empty() && self.hash_mismatches.is_empty()
    }
}

/// What happened to one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Created,
    Updated { content_changed: bool },
    Skipped,
    Deleted,
    /// Not a memory document (a session transcript).
    Ignored,
}

pub struct Syncer {
    roots: Arc<Roots>,
    files: FileStore,
}

impl Syncer {
    pub fn new(roots: Arc<Roots>) -> Self {
        Self {
            roots,
            files: FileStore::new(),
        }
    }

    /// Create missing rows, refresh drifted ones, drop orphans.
    pub fn sync_all(&self) -> Result<SyncReport> {
        self.run(false)
    }

    /// Like [`sync_all`](Self::sync_all) but rewrites every row.
    pub fn reindex(&self) -> Result<SyncReport> {
        self.run(true)
    }

    fn run(&self, force: bool) -> Result<SyncReport> {
        let layout = self.roots.layout()?;
        let mut report = SyncReport::default();
        for (scope, stores) in self.roots.all_stores()? {
            let root = layout.root(scope)?;
            report.merge(self.sync_root(&root, &stores, force)?);
        }
        info!(
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            skipped = report.skipped,
            errors = report.errors.len(),
            force,
            "index sync finished"
        );
        Ok(report)
    }

    fn sync_root(&self, root: &Path, stores: &ScopeStores, force: bool) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let paths = memory_documents(root);
        let existing: HashSet<PathBuf> = paths.iter().cloned().collect();

        for path in &paths {
            let text = match self.files.read(path) {
                Ok(text) => text,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "sync skipped unreadable file");
                    report.errors.push(format!("{}: {e}", path.display()));
                    continue;
                }
            };
            match reconcile(stores, path, &text, force) {
                Ok((action, memory)) => {
                    if let Some(memory) = memory {
                        report.record(action, &memory.id, memory.tier);
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "sync failed for document");
                    report.errors.push(format!("{}: {e}", path.display()));
                }
            }
        }

        for orphan in stores.index.orphans(&existing)? {
            match drop_row(stores, &orphan.id) {
                Ok(()) => {
                    debug!(id = %orphan.id, path = %orphan.file_path.display(), "orphaned index row removed");
                    report.deleted += 1;
                }
                Err(e) => report.errors.push(format!("{}: {e}", orphan.id)),
            }
        }
        Ok(report)
    }

    /// Incremental resync of one document. A vanished file drops its row.
    pub fn sync_file(&self, path: &Path) -> Result<SyncAction> {
        let stores = self.stores_for(path)?;
        if !path.exists() {
            return match stores.index.get_by_path(path)? {
                Some(row) => {
                    drop_row(&stores, &row.id)?;
                    Ok(SyncAction::Deleted)
                }
                None => Ok(SyncAction::Skipped),
            };
        }
        let text = self.files.read(path)?;
        Ok(reconcile(&stores, path, &text, false)?.0)
    }

    /// Audit every root without changing anything.
    pub fn check_consistency(&self) -> Result<ConsistencyReport> {
        let layout = self.roots.layout()?;
        let mut report = ConsistencyReport::default();
        for (scope, stores) in self.roots.all_stores()? {
            let root = layout.root(scope)?;
            let paths = memory_documents(&root);
            let existing: HashSet<PathBuf> = paths.iter().cloned().collect();
            for path in &paths {
                let memory = match self.files.read(path).and_then(|text| match document_tier(&text) {
                    Some(Tier::Session) => Ok(None),
                    _ => decode_memory(&text, path).map(Some),
                }) {
                    Ok(Some(memory)) => memory,
                    Ok(None) => continue,
                    Err(e) => {
                        report.errors.push(format!("{}: {e}", path.display()));
                        continue;
                    }
                };
                match stores.index.get(&memory.id)? {
                    None => report.orphaned_files.push(path.clone()),
                    Some(row) if row.content_hash != memory.content_hash => {
                        report.hash_mismatches.push(memory.id);
                    }
                    Some(_) => {}
                }
            }
            for orphan in stores.index.orphans(&existing)? {
                report.orphaned_index.push(orphan.id);
            }
        }
        Ok(report)
    }

    fn stores_for(&self, path: &Path) -> Result<ScopeStores> {
        let layout = self.roots.layout()?;
        // Project roots can sit below the global root; prefer the deeper match.
        let mut best: Option<(usize, ScopeStores)> = None;
        for (scope, stores) in self.roots.all_stores()? {
            let root = layout.root(scope)?;
            if path.starts_with(&root) {
                let depth = root.components().count();
                if best.as_ref().is_none_or(|(d, _)| depth > *d) {
                    best = Some((depth, stores));
                }
            }
        }
        best.map(|(_, stores)| stores)
            .ok_or_else(|| Error::invalid("sync_file", "path is outside every memory root").with_path(path))
    }
}

/// Bring one document's row in line with the file.
fn reconcile(stores: &ScopeStores, path: &Path, text: &str, force: bool) -> Result<(SyncAction, Option<Memory>)> {
    if document_tier(text) == Some(Tier::Session) {
        return Ok((SyncAction::Ignored, None));
    }
    let memory = decode_memory(text, path)?;
    let mut row = IndexRow::from_memory(&memory);
    let action = match stores.index.get(&memory.id)? {
        None => SyncAction::Created,
        Some(existing) => {
            let content_changed = existing.content_hash != memory.content_hash;
            let moved = existing.file_path != memory.file_path;
            if !force && !content_changed && !moved {
                return Ok((SyncAction::Skipped, Some(memory)));
            }
            row.access_count = row.access_count.max(existing.access_count);
            row.accessed_at = row.accessed_at.max(existing.accessed_at);
            if content_changed {
                debug!(id = %memory.id, "document drifted from index");
            }
            SyncAction::Updated { content_changed }
        }
    };
    stores.index.upsert(&row)?;
    Ok((action, Some(memory)))
}

fn drop_row(stores: &ScopeStores, id: &str) -> Result<()> {
    stores.index.delete(id)?;
    stores.vectors.delete(id)?;
    Ok(())
}

/// Every document below `root` outside the live `sessions/` tree, sorted.
fn memory_documents(root: &Path) -> Vec<PathBuf> {
    let sessions = root.join("sessions");
    let mut out: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.path() != sessions)
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && is_document(entry.path()))
        .map(|entry| entry.into_path())
        .collect();
    out.sort();
    out
}
