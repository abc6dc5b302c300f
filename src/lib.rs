//! Local, file-backed, multi-tier memory for AI agents.
//!
//! Strata keeps an agent's memory as plain text documents on disk and
//! organizes it into four tiers:
//!
//! | Tier | Holds | Scope | Lifetime |
//! |------|-------|-------|----------|
//! | **Core** | Preferences, rules, persona | Global | Permanent |
//! | **Session** | The current conversation transcript | Global or project | Until trimmed or ended |
//! | **Short-term** | Tasks, notes, working context | Global or project | Expires (TTL) |
//! | **Long-term** | Project facts, knowledge, decisions | Global or project | Archived when inactive |
//!
//! Documents are the source of truth. A per-root SQLite index (FTS5 when the
//! build supports it) and a vector store are derived from them and can always
//! be rebuilt with [`memory::sync::Syncer::reindex`].
//!
//! # Architecture
//!
//! - **Storage**: one `.md` document per memory, TOML header between `+++` lines
//! - **Index**: SQLite metadata rows with FTS5 keyword search, substring fallback
//! - **Vectors**: brute-force cosine search over SQLite-stored vectors
//! - **Retrieval**: keyword + vector hits merged by id, weighted by recency,
//!   importance and access frequency
//! - **Lifecycle**: one background task expires, archives, promotes and resyncs
//!
//! # Modules
//!
//! - [`config`]: TOML configuration with environment overrides
//! - [`engine`]: the [`engine::MemoryEngine`] façade
//! - [`memory`]: tier managers, retrieval, context assembly, sync and lifecycle
//! - [`storage`]: directory layout, document codec and atomic file store
//! - [`index`] / [`vector`]: derived metadata and vector stores
//! - [`embedding`] / [`completion`]: the external capabilities the engine consumes
//! - [`tools`]: memory operations offered to a completion-driven agent

pub mod classify;
pub mod cli;
pub mod completion;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod index;
pub mod memory;
pub mod storage;
pub mod tools;
pub mod vector;

pub use engine::{EngineOptions, MemoryEngine};
pub use error::{Error, ErrorKind, Result};
