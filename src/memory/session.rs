//! Conversation sessions: the one tier with live in-process state.
//!
//! Exactly one session is current. Its message buffer sits behind a single
//! mutex used by readers and writers alike, and every append rewrites the
//! whole session document. Creating a new session archives the previous one.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use super::roots::Roots;
use super::tier::Section;
use super::types::{estimate_tokens, Scope, Session, SessionMessage, Status};
use crate::error::{Error, ErrorKind, Result};
use crate::storage::{content_hash, is_document, FileStore};

pub struct SessionManager {
    roots: Arc<Roots>,
    files: FileStore,
    max_tokens: usize,
    current: Mutex<Option<Session>>,
}

impl SessionManager {
    pub fn new(roots: Arc<Roots>, max_tokens: usize) -> Self {
        Self {
            roots,
            files: FileStore::new(),
            max_tokens: max_tokens.max(1),
            current: Mutex::new(None),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Session>>> {
        self.current
            .lock()
            .map_err(|_| Error::new(ErrorKind::Operation, "session", "lock poisoned"))
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Start a new current session, archiving the previous one.
    pub fn create(&self, title: Option<&str>) -> Result<Session> {
        let mut current = self.lock()?;
        if let Some(previous) = current.as_ref() {
            self.archive_session(previous)?;
            *current = None;
        }

        let scope = self.roots.default_scope();
        let layout = self.roots.layout()?;
        let now = Utc::now();
        let id = Uuid::now_v7().to_string();
        let dir = layout.session_day_dir(scope, now)?;
        let title_text = title.unwrap_or("");
        let mut path = dir.join(layout.file_name(now, "session", title_text, &id));
        if path.exists() {
            path = dir.join(layout.unique_file_name(now, "session", title_text, &id));
        }

        let session = Session {
            id,
            title: title.map(str::to_string),
            scope,
            project_path: self.roots.project_path().filter(|_| scope == Scope::Project),
            status: Status::Active,
            token_count: 0,
            message_count: 0,
            content_hash: content_hash(""),
            created_at: now,
            updated_at: now,
            file_path: path,
            messages: Vec::new(),
        };
        self.files.create_session(&session)?;
        info!(id = %session.id, path = %session.file_path.display(), "session started");
        *current = Some(session.clone());
        Ok(session)
    }

    /// Snapshot of the current session.
    pub fn current(&self) -> Result<Option<Session>> {
        Ok(self.lock()?.clone())
    }

    /// Current session, creating an untitled one when there is none.
    pub fn ensure_current(&self) -> Result<Session> {
        if let Some(session) = self.current()? {
            return Ok(session);
        }
        self.create(None)
    }

    /// Append one turn and rewrite the session document. Returns the new
    /// running token count. The buffer only changes once the write succeeds.
    pub fn append_message(&self, message: SessionMessage) -> Result<usize> {
        self.ensure_current()?;
        let mut current = self.lock()?;
        let session = current
            .as_mut()
            .ok_or_else(|| Error::not_found("append_message", "no current session"))?;
        let mut next = session.clone();
        next.messages.push(message);
        self.persist(&mut next)?;
        *session = next;
        Ok(session.token_count)
    }

    pub fn messages(&self) -> Result<Vec<SessionMessage>> {
        Ok(self
            .lock()?
            .as_ref()
            .map(|s| s.messages.clone())
            .unwrap_or_default())
    }

    /// Swap the current message sequence wholesale.
    pub fn replace_messages(&self, messages: Vec<SessionMessage>) -> Result<Session> {
        let mut current = self.lock()?;
        let session = current
            .as_mut()
            .ok_or_else(|| Error::not_found("replace_messages", "no current session"))?;
        let mut next = Session {
            messages,
            ..session.clone()
        };
        self.persist(&mut next)?;
        *session = next;
        Ok(session.clone())
    }

    /// Drop the `count` oldest messages of session `id`, keeping anything
    /// appended since the caller last looked.
    pub fn drop_oldest(&self, id: &str, count: usize) -> Result<Session> {
        let mut current = self.lock()?;
        let session = current
            .as_mut()
            .filter(|s| s.id == id)
            .ok_or_else(|| Error::not_found("trim_session", format!("session {id} is no longer current")))?;
        let mut next = session.clone();
        next.messages.drain(..count.min(next.messages.len()));
        self.persist(&mut next)?;
        *session = next;
        Ok(session.clone())
    }

    /// Make a stored session current again. The previous current session is
    /// already on disk and is left as it is.
    pub fn restore(&self, id: &str) -> Result<Session> {
        let mut session = self
            .list()?
            .into_iter()
            .find(|s| s.id == id)
            .ok_or_else(|| Error::not_found("restore_session", format!("no session with id {id}")))?;
        if session.status != Status::Active {
            return Err(Error::invalid(
                "restore_session",
                format!("session {id} is {}", session.status),
            ));
        }
        session.recount();
        debug!(id, messages = session.message_count, "session restored");
        *self.lock()? = Some(session.clone());
        Ok(session)
    }

    /// Stored (non-archived) sessions across active roots, newest first.
    /// Unreadable documents are skipped.
    pub fn list(&self) -> Result<Vec<Session>> {
        let layout = self.roots.layout()?;
        let mut sessions = Vec::new();
        for scope in self.roots.scopes()? {
            for path in session_files(&layout.sessions_dir(scope)?) {
                match self.files.load_session(&path) {
                    Ok(session) => sessions.push(session),
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable session"),
                }
            }
        }
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    /// Archive the current session and leave none current.
    pub fn clear(&self) -> Result<Option<Session>> {
        let mut current = self.lock()?;
        let Some(session) = current.as_ref() else {
            return Ok(None);
        };
        let archived = self.archive_session(session)?;
        *current = None;
        Ok(Some(archived))
    }

    /// Current token count over the session budget; zero without a session.
    pub fn usage_ratio(&self) -> Result<f64> {
        let tokens = self.lock()?.as_ref().map(|s| s.token_count).unwrap_or(0);
        Ok(tokens as f64 / self.max_tokens as f64)
    }

    /// The most recent turns that fit `max_tokens`, oldest first.
    pub fn build_context(&self, max_tokens: usize) -> Result<Section> {
        let current = self.lock()?;
        let Some(session) = current.as_ref() else {
            return Ok(Section::default());
        };
        let header = "## Current Session\n\n";
        let mut used = estimate_tokens(header);
        let mut picked = Vec::new();
        for message in session.messages.iter().rev() {
            let entry = format!("**{}**: {}\n", message.role, message.content);
            let cost = estimate_tokens(&entry);
            if used + cost > max_tokens {
                break;
            }
            used += cost;
            picked.push(entry);
        }
        if picked.is_empty() {
            return Ok(Section::default());
        }
        picked.reverse();
        Ok(Section {
            text: format!("{header}{}", picked.concat()),
            tokens: used,
            ids: vec![session.id.clone()],
        })
    }

    fn persist(&self, session: &mut Session) -> Result<()> {
        session.recount();
        session.updated_at = Utc::now();
        self.files.update_session(session)?;
        Ok(())
    }

    /// Archived copy of `session`: rewritten with the archived status and
    /// moved under the owning root's archive. `session` itself is not touched.
    fn archive_session(&self, session: &Session) -> Result<Session> {
        let mut archived = session.clone();
        archived.status = Status::Archived;
        let root = session_root(&archived.file_path).ok_or_else(|| {
            Error::invalid("archive_session", "session file is not under a sessions directory")
                .with_path(&archived.file_path)
        })?;
        self.persist(&mut archived)?;
        let dir = root
            .join("archive")
            .join(Utc::now().format("%Y-%m").to_string())
            .join("session");
        archived.file_path = self.files.move_into(&archived.file_path, &dir)?;
        debug!(id = %archived.id, path = %archived.file_path.display(), "session archived");
        Ok(archived)
    }
}

/// `<root>/sessions/<day>/<file>` resolves to `<root>`.
fn session_root(path: &Path) -> Option<PathBuf> {
    let day = path.parent()?;
    let sessions = day.parent()?;
    if sessions.file_name()? != "sessions" {
        return None;
    }
    sessions.parent().map(Path::to_path_buf)
}

/// Session documents in the date folders below `dir`.
pub fn session_files(dir: &Path) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(2)
        .max_depth(2)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && is_document(entry.path()))
        .map(|entry| entry.into_path())
        .collect();
    out.sort();
    out
}
