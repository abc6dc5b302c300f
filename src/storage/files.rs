//! Whole-file CRUD for memory and session documents.
//!
//! Every write goes to a sibling temp file first and is renamed into place, so a
//! document is never left half-written. There is no locking: the last writer
//! wins and the index syncer notices drift afterwards.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::codec;
use super::layout::DOCUMENT_EXT;
use crate::error::{Error, Result};
use crate::memory::types::{Memory, Session, Status};

#[derive(Debug, Clone, Default)]
pub struct FileStore;

impl FileStore {
    pub fn new() -> Self {
        Self
    }

    /// Write a new document. Fails if `path` already exists.
    pub fn create(&self, path: &Path, text: &str) -> Result<()> {
        if path.exists() {
            return Err(Error::new(
                crate::error::ErrorKind::AlreadyExists,
                "create_document",
                "refusing to overwrite existing document",
            )
            .with_path(path));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io("create_document", parent, e))?;
        }
        write_atomic("create_document", path, text)?;
        debug!(path = %path.display(), "document created");
        Ok(())
    }

    /// Overwrite an existing document. Fails if `path` does not exist.
    pub fn update(&self, path: &Path, text: &str) -> Result<()> {
        if !path.exists() {
            return Err(Error::not_found("update_document", "document does not exist").with_path(path));
        }
        write_atomic("update_document", path, text)
    }

    pub fn read(&self, path: &Path) -> Result<String> {
        std::fs::read_to_string(path).map_err(|e| Error::io("read_document", path, e))
    }

    pub fn delete(&self, path: &Path) -> Result<()> {
        std::fs::remove_file(path).map_err(|e| Error::io("delete_document", path, e))
    }

    /// Move `path` into `dir`, keeping its file name. Returns the new path.
    pub fn move_into(&self, path: &Path, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir).map_err(|e| Error::io("move_document", dir, e))?;
        let name = path
            .file_name()
            .ok_or_else(|| Error::invalid("move_document", "path has no file name").with_path(path))?;
        let mut target = dir.join(name);
        if target.exists() {
            let stem = target
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let stamp = chrono::Utc::now().format("%H%M%S%3f");
            target = dir.join(format!("{stem}-{stamp}.{DOCUMENT_EXT}"));
        }
        std::fs::rename(path, &target).map_err(|e| Error::io("move_document", path, e))?;
        Ok(target)
    }

    /// Document files directly inside `dir` (non-recursive). Missing dir is empty.
    pub fn list(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io("list_documents", dir, e)),
        };
        let mut paths = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            let path = entry.path();
            if path.is_file() && is_document(&path) {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    // ── Memory helpers ───────────────────────────────────────────────────────

    pub fn create_memory(&self, memory: &Memory) -> Result<()> {
        self.create(&memory.file_path, &codec::encode_memory(memory)?)
    }

    pub fn update_memory(&self, memory: &Memory) -> Result<()> {
        self.update(&memory.file_path, &codec::encode_memory(memory)?)
    }

    pub fn load_memory(&self, path: &Path) -> Result<Memory> {
        let text = self.read(path)?;
        codec::decode_memory(&text, path)
    }

    /// Every decodable memory in `dir`; unreadable files are logged and skipped.
    pub fn list_memories(&self, dir: &Path) -> Result<Vec<Memory>> {
        let mut memories = Vec::new();
        for path in self.list(dir)? {
            match self.load_memory(&path) {
                Ok(mem) => memories.push(mem),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable memory file"),
            }
        }
        Ok(memories)
    }

    /// Flip `memory` to `status`, persist it, then move it under `archive_dir`.
    pub fn archive_memory(&self, memory: &mut Memory, archive_dir: &Path, status: Status) -> Result<()> {
        memory.status = status;
        memory.updated_at = chrono::Utc::now();
        self.update_memory(memory)?;
        memory.file_path = self.move_into(&memory.file_path, archive_dir)?;
        Ok(())
    }

    // ── Session helpers ──────────────────────────────────────────────────────

    pub fn create_session(&self, session: &Session) -> Result<()> {
        self.create(&session.file_path, &codec::encode_session(session)?)
    }

    pub fn update_session(&self, session: &Session) -> Result<()> {
        self.update(&session.file_path, &codec::encode_session(session)?)
    }

    pub fn load_session(&self, path: &Path) -> Result<Session> {
        let text = self.read(path)?;
        codec::decode_session(&text, path)
    }
}

pub fn is_document(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == DOCUMENT_EXT)
}

fn write_atomic(op: &'static str, path: &Path, text: &str) -> Result<()> {
    let tmp = path.with_extension(format!("{DOCUMENT_EXT}.tmp"));
    std::fs::write(&tmp, text).map_err(|e| Error::io(op, &tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        Error::io(op, path, e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::{Category, Scope, Tier};
    use chrono::Utc;

    fn memory_at(path: PathBuf) -> Memory {
        let now = Utc::now();
        Memory {
            id: "id-1".into(),
            tier: Tier::ShortTerm,
            scope: Scope::Global,
            category: Category::Note,
            title: "A note".into(),
            content: "remember the milk".into(),
            tags: vec![],
            related: vec![],
            project_path: None,
            status: Status::Active,
            importance: 3,
            access_count: 0,
            content_hash: codec::content_hash("remember the milk"),
            expires_at: None,
            created_at: now,
            updated_at: now,
            accessed_at: None,
            file_path: path,
        }
    }

    #[test]
    fn create_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new();
        let mem = memory_at(dir.path().join("notes/a.md"));
        store.create_memory(&mem).unwrap();
        let err = store.create_memory(&mem).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::AlreadyExists);
    }

    #[test]
    fn update_requires_existing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new();
        let mem = memory_at(dir.path().join("missing.md"));
        assert!(store.update_memory(&mem).unwrap_err().is_not_found());
    }

    #[test]
    fn list_skips_non_documents_and_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new();
        store.create_memory(&memory_at(dir.path().join("good.md"))).unwrap();
        std::fs::write(dir.path().join("bad.md"), "no header here").unwrap();
        std::fs::write(dir.path().join("ignore.txt"), "text").unwrap();
        std::fs::create_dir_all(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/deep.md"), "x").unwrap();

        assert_eq!(store.list(dir.path()).unwrap().len(), 2);
        let mems = store.list_memories(dir.path()).unwrap();
        assert_eq!(mems.len(), 1);
        assert_eq!(mems[0].title, "A note");
        assert!(store.list(&dir.path().join("absent")).unwrap().is_empty());
    }

    #[test]
    fn archive_moves_and_flips_status() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new();
        let original = dir.path().join("notes/a.md");
        let mut mem = memory_at(original.clone());
        store.create_memory(&mem).unwrap();

        let archive = dir.path().join("archive/2026-01/short_term");
        store.archive_memory(&mut mem, &archive, Status::Archived).unwrap();

        assert!(!original.exists());
        assert_eq!(mem.file_path, archive.join("a.md"));
        let reloaded = store.load_memory(&mem.file_path).unwrap();
        assert_eq!(reloaded.status, Status::Archived);
    }
}
