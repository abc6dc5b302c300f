pub mod migrations;
pub mod schema;

use rusqlite::Connection;
use std::path::Path;

use crate::error::{Error, Result};

/// Open (or create) a SQLite file, creating its parent directory first.
fn open_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io("open_database", parent, e))?;
    }

    let conn = Connection::open(path)
        .map_err(|e| Error::storage("open_database", e).with_path(path))?;

    // Enable WAL mode for better concurrent read performance
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| Error::storage("open_database", e).with_path(path))?;
    Ok(conn)
}

/// Open the metadata index at `path` with schema and migrations applied.
///
/// Returns the connection and whether FTS5 is available. The probe happens
/// once here; the answer is cached by the caller for the process lifetime.
pub fn open_index_database(path: impl AsRef<Path>) -> Result<(Connection, bool)> {
    let path = path.as_ref();
    let mut conn = open_connection(path)?;
    let fts = prepare_index(&mut conn).map_err(|e| e.with_path(path))?;
    tracing::info!(path = %path.display(), fts, "index database initialized");
    Ok((conn, fts))
}

/// Open the vector store at `path`, warning when the recorded dimension differs.
pub fn open_vector_database(path: impl AsRef<Path>, dimension: usize) -> Result<Connection> {
    let path = path.as_ref();
    let conn = open_connection(path)?;
    prepare_vectors(&conn, dimension).map_err(|e| e.with_path(path))?;
    tracing::info!(path = %path.display(), dimension, "vector database initialized");
    Ok(conn)
}

/// Open an in-memory index database (tests and ephemeral engines).
pub fn open_memory_index() -> Result<(Connection, bool)> {
    let mut conn = Connection::open_in_memory().map_err(|e| Error::storage("open_database", e))?;
    let fts = prepare_index(&mut conn)?;
    Ok((conn, fts))
}

/// Open an in-memory vector database (tests and ephemeral engines).
pub fn open_memory_vectors(dimension: usize) -> Result<Connection> {
    let conn = Connection::open_in_memory().map_err(|e| Error::storage("open_database", e))?;
    prepare_vectors(&conn, dimension)?;
    Ok(conn)
}

fn prepare_index(conn: &mut Connection) -> Result<bool> {
    schema::init_index_schema(conn).map_err(|e| Error::storage("init_index_schema", e))?;
    let fts = schema::try_init_fts(conn);
    migrations::run_migrations(conn, fts).map_err(|e| Error::storage("run_migrations", e))?;
    Ok(fts)
}

fn prepare_vectors(conn: &Connection, dimension: usize) -> Result<()> {
    schema::init_vector_schema(conn).map_err(|e| Error::storage("init_vector_schema", e))?;
    match migrations::get_embedding_dimension(conn).map_err(|e| Error::storage("open_vectors", e))? {
        Some(stored) if stored != dimension => {
            tracing::warn!(
                stored,
                configured = dimension,
                "embedding dimension changed; reindex to rebuild vectors"
            );
        }
        Some(_) => {}
        None => migrations::set_embedding_dimension(conn, dimension)
            .map_err(|e| Error::storage("open_vectors", e))?,
    }
    Ok(())
}
