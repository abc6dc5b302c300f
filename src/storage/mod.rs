//! On-disk documents: directory layout, text codec and file CRUD.

pub mod codec;
pub mod files;
pub mod layout;

pub use codec::{content_hash, Document};
pub use files::{is_document, FileStore};
pub use layout::{detect_project_root, StorageLayout};
