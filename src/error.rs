//! Structured error type shared by every layer of the engine.
//!
//! Each [`Error`] records which operation failed, the file involved (if any),
//! a coarse [`ErrorKind`] callers can branch on, and the wrapped cause.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Memory, session, file, index row, vector or config is missing.
    NotFound,
    /// A create would overwrite an existing document.
    AlreadyExists,
    /// Document header is absent or cannot be decoded.
    Malformed,
    /// File and index disagree on the content hash.
    IndexDesync,
    /// A token or context budget was exceeded.
    Capacity,
    /// The embedding or completion capability failed.
    Upstream,
    Timeout,
    Cancelled,
    InvalidInput,
    Io,
    Storage,
    Operation,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not found",
            Self::AlreadyExists => "already exists",
            Self::Malformed => "malformed document",
            Self::IndexDesync => "index out of sync",
            Self::Capacity => "capacity exceeded",
            Self::Upstream => "upstream failure",
            Self::Timeout => "timed out",
            Self::Cancelled => "cancelled",
            Self::InvalidInput => "invalid input",
            Self::Io => "i/o error",
            Self::Storage => "storage error",
            Self::Operation => "operation failed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An engine error with operation, path and cause attached.
#[derive(Debug, Error)]
#[error("{op}: {kind}{}: {message}", path_suffix(.path))]
pub struct Error {
    pub kind: ErrorKind,
    pub op: &'static str,
    pub path: Option<PathBuf>,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

fn path_suffix(path: &Option<PathBuf>) -> String {
    match path {
        Some(p) => format!(" ({})", p.display()),
        None => String::new(),
    }
}

impl Error {
    pub fn new(kind: ErrorKind, op: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            op,
            path: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn not_found(op: &'static str, what: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, op, what)
    }

    pub fn malformed(op: &'static str, path: impl AsRef<Path>, why: impl Into<String>) -> Self {
        Self::new(ErrorKind::Malformed, op, why).with_path(path)
    }

    pub fn invalid(op: &'static str, why: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, op, why)
    }

    pub fn upstream(op: &'static str, why: impl Into<String>) -> Self {
        Self::new(ErrorKind::Upstream, op, why)
    }

    pub fn cancelled(op: &'static str) -> Self {
        Self::new(ErrorKind::Cancelled, op, "cancelled by caller")
    }

    /// Wrap a filesystem error, keeping the io kind's not-found signal.
    pub fn io(op: &'static str, path: impl AsRef<Path>, err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            std::io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists,
            _ => ErrorKind::Io,
        };
        Self::new(kind, op, err.to_string())
            .with_path(path)
            .with_source(err)
    }

    /// Wrap a SQLite error raised while running `op`.
    pub fn storage(op: &'static str, err: rusqlite::Error) -> Self {
        let kind = match err {
            rusqlite::Error::QueryReturnedNoRows => ErrorKind::NotFound,
            _ => ErrorKind::Storage,
        };
        Self::new(kind, op, err.to_string()).with_source(err)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    pub fn is_malformed(&self) -> bool {
        self.kind == ErrorKind::Malformed
    }

    pub fn is_upstream(&self) -> bool {
        matches!(self.kind, ErrorKind::Upstream | ErrorKind::Timeout)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::storage("sqlite", err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            _ => ErrorKind::Io,
        };
        Self::new(kind, "io", err.to_string()).with_source(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorKind::Operation, "json", err.to_string()).with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_not_found_is_not_found() {
        let err = Error::io(
            "read",
            "/tmp/missing.md",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.is_not_found());
        assert_eq!(err.path.as_deref(), Some(Path::new("/tmp/missing.md")));
        assert!(err.to_string().contains("/tmp/missing.md"));
    }

    #[test]
    fn no_rows_maps_to_not_found() {
        let err: Error = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(err.is_not_found());
    }

    #[test]
    fn display_includes_op_and_kind() {
        let err = Error::malformed("decode_memory", "a.md", "missing header");
        let text = err.to_string();
        assert!(text.starts_with("decode_memory: malformed document"));
        assert!(text.contains("missing header"));
        assert!(err.is_malformed());
        assert!(!err.is_not_found());
    }
}
