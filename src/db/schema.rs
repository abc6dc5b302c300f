//! SQL DDL for the per-root index and vector files.
//!
//! `index.db` holds `memory_index` (one denormalized row per document), the
//! optional `memory_fts` FTS5 shadow table with its sync triggers, and
//! `schema_meta`. `vectors.db` holds `memory_vectors` and its own `schema_meta`.
//! All DDL uses `IF NOT EXISTS` for idempotent initialization.

use rusqlite::Connection;

/// Metadata index table. Content bodies live only in the documents.
const INDEX_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS memory_index (
    id TEXT PRIMARY KEY,
    tier TEXT NOT NULL CHECK(tier IN ('core','session','short_term','long_term')),
    scope TEXT NOT NULL CHECK(scope IN ('global','project')),
    category TEXT NOT NULL,
    title TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    related TEXT NOT NULL DEFAULT '[]',
    project_path TEXT,
    status TEXT NOT NULL DEFAULT 'active' CHECK(status IN ('active','archived','expired')),
    importance INTEGER NOT NULL DEFAULT 3 CHECK(importance >= 1 AND importance <= 5),
    access_count INTEGER NOT NULL DEFAULT 0,
    content_hash TEXT NOT NULL,
    expires_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    accessed_at TEXT,
    file_path TEXT NOT NULL UNIQUE
);

CREATE INDEX IF NOT EXISTS idx_memory_tier ON memory_index(tier);
CREATE INDEX IF NOT EXISTS idx_memory_scope ON memory_index(scope);
CREATE INDEX IF NOT EXISTS idx_memory_category ON memory_index(category);
CREATE INDEX IF NOT EXISTS idx_memory_status ON memory_index(status);
CREATE INDEX IF NOT EXISTS idx_memory_expires ON memory_index(expires_at);
CREATE INDEX IF NOT EXISTS idx_memory_created ON memory_index(created_at);

CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// FTS5 shadow table over title/tags/category, kept in sync by triggers.
const FTS_SCHEMA_SQL: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS memory_fts USING fts5(
    title,
    tags,
    category,
    content='memory_index',
    content_rowid='rowid'
);

CREATE TRIGGER IF NOT EXISTS memory_index_ai AFTER INSERT ON memory_index BEGIN
    INSERT INTO memory_fts(rowid, title, tags, category)
    VALUES (new.rowid, new.title, new.tags, new.category);
END;

CREATE TRIGGER IF NOT EXISTS memory_index_ad AFTER DELETE ON memory_index BEGIN
    INSERT INTO memory_fts(memory_fts, rowid, title, tags, category)
    VALUES ('delete', old.rowid, old.title, old.tags, old.category);
END;

CREATE TRIGGER IF NOT EXISTS memory_index_au AFTER UPDATE ON memory_index BEGIN
    INSERT INTO memory_fts(memory_fts, rowid, title, tags, category)
    VALUES ('delete', old.rowid, old.title, old.tags, old.category);
    INSERT INTO memory_fts(rowid, title, tags, category)
    VALUES (new.rowid, new.title, new.tags, new.category);
END;
"#;

const VECTOR_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS memory_vectors (
    id TEXT PRIMARY KEY,
    embedding BLOB NOT NULL,
    dimension INTEGER NOT NULL,
    norm REAL NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize the index tables. Idempotent (uses IF NOT EXISTS).
pub fn init_index_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(INDEX_SCHEMA_SQL)?;

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}

/// Try to create the FTS5 shadow table. Returns `false` when the SQLite build
/// lacks FTS5; callers then fall back to substring search.
pub fn try_init_fts(conn: &Connection) -> bool {
    match conn.execute_batch(FTS_SCHEMA_SQL) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "full-text search unavailable, using substring search");
            false
        }
    }
}

pub fn init_vector_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(VECTOR_SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(conn: &Connection) -> Vec<String> {
        conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn index_schema_creates_all_tables() {
        let conn = Connection::open_in_memory().unwrap();
        init_index_schema(&conn).unwrap();
        assert!(try_init_fts(&conn));

        let tables = table_names(&conn);
        assert!(tables.contains(&"memory_index".to_string()));
        assert!(tables.contains(&"memory_fts".to_string()));
        assert!(tables.contains(&"schema_meta".to_string()));
    }

    #[test]
    fn schemas_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_index_schema(&conn).unwrap();
        init_index_schema(&conn).unwrap();
        assert!(try_init_fts(&conn));
        assert!(try_init_fts(&conn));

        let vconn = Connection::open_in_memory().unwrap();
        init_vector_schema(&vconn).unwrap();
        init_vector_schema(&vconn).unwrap();
        assert!(table_names(&vconn).contains(&"memory_vectors".to_string()));
    }

    #[test]
    fn fts_triggers_track_inserts() {
        let conn = Connection::open_in_memory().unwrap();
        init_index_schema(&conn).unwrap();
        assert!(try_init_fts(&conn));
        conn.execute(
            "INSERT INTO memory_index (id, tier, scope, category, title, tags, content_hash, created_at, updated_at, file_path) \
             VALUES ('a', 'core', 'global', 'preference', 'Editor choice', '[\"vim\"]', 'h', 't', 't', '/a.md')",
            [],
        )
        .unwrap();
        let found: i64 = conn
            .query_row("SELECT COUNT(*) FROM memory_fts WHERE memory_fts MATCH 'vim'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(found, 1);

        conn.execute("DELETE FROM memory_index WHERE id = 'a'", []).unwrap();
        let found: i64 = conn
            .query_row("SELECT COUNT(*) FROM memory_fts WHERE memory_fts MATCH 'vim'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(found, 0);
    }
}
