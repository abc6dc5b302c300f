use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use super::{keywords, IndexFilter, IndexRow, MetadataIndex};
use crate::db;
use crate::error::{Error, ErrorKind, Result};

const COLUMNS: &str = "id, tier, scope, category, title, tags, related, project_path, status, \
     importance, access_count, content_hash, expires_at, created_at, updated_at, accessed_at, file_path";

/// `index.db` for one root.
pub struct SqliteIndex {
    conn: Mutex<Connection>,
    fts: bool,
}

impl SqliteIndex {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let (conn, fts) = db::open_index_database(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
            fts,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let (conn, fts) = db::open_memory_index()?;
        Ok(Self {
            conn: Mutex::new(conn),
            fts,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::new(ErrorKind::Storage, "index_lock", "connection lock poisoned"))
    }

    fn select(&self, op: &'static str, sql: &str, params: Vec<Value>) -> Result<Vec<IndexRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql).map_err(|e| Error::storage(op, e))?;
        let rows = stmt
            .query_map(params_from_iter(params), row_to_index)
            .map_err(|e| Error::storage(op, e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::storage(op, e))?;
        Ok(rows)
    }

    fn fts_search(&self, query: &str, filter: &IndexFilter, limit: usize) -> Result<Vec<IndexRow>> {
        let escaped = escape_fts_query(query);
        if escaped.is_empty() {
            return Ok(Vec::new());
        }
        let mut params = vec![Value::Text(escaped)];
        let clause = filter_clause(filter, &mut params, "m.");
        params.push(Value::Integer(limit as i64));
        let sql = format!(
            "SELECT {} FROM memory_fts JOIN memory_index m ON m.rowid = memory_fts.rowid \
             WHERE memory_fts MATCH ?1{} ORDER BY memory_fts.rank LIMIT ?{}",
            prefixed_columns("m."),
            clause,
            params.len()
        );
        self.select("index_search", &sql, params)
    }

    fn substring_search(&self, query: &str, filter: &IndexFilter, limit: usize) -> Result<Vec<IndexRow>> {
        let terms = keywords(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let mut params = Vec::new();
        let mut ors = Vec::new();
        for term in terms {
            params.push(Value::Text(format!("%{term}%")));
            let n = params.len();
            ors.push(format!("lower(title) LIKE ?{n} OR lower(tags) LIKE ?{n} OR category LIKE ?{n}"));
        }
        let clause = filter_clause(filter, &mut params, "");
        params.push(Value::Integer(limit as i64));
        let sql = format!(
            "SELECT {COLUMNS} FROM memory_index WHERE ({}){} ORDER BY updated_at DESC LIMIT ?{}",
            ors.join(" OR "),
            clause,
            params.len()
        );
        self.select("index_search", &sql, params)
    }
}

impl MetadataIndex for SqliteIndex {
    fn has_fts(&self) -> bool {
        self.fts
    }

    fn upsert(&self, row: &IndexRow) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(|e| Error::storage("index_upsert", e))?;
        let path = path_text(&row.file_path);
        // A renamed or re-created document may reuse a path under a new id.
        tx.execute(
            "DELETE FROM memory_index WHERE file_path = ?1 AND id != ?2",
            params![path, row.id],
        )
        .map_err(|e| Error::storage("index_upsert", e))?;
        tx.execute(
            &format!(
                "INSERT INTO memory_index ({COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17) \
                 ON CONFLICT(id) DO UPDATE SET \
                    tier = excluded.tier, scope = excluded.scope, category = excluded.category, \
                    title = excluded.title, tags = excluded.tags, related = excluded.related, \
                    project_path = excluded.project_path, status = excluded.status, \
                    importance = excluded.importance, access_count = excluded.access_count, \
                    content_hash = excluded.content_hash, expires_at = excluded.expires_at, \
                    created_at = excluded.created_at, updated_at = excluded.updated_at, \
                    accessed_at = excluded.accessed_at, file_path = excluded.file_path"
            ),
            params![
                row.id,
                row.tier.as_str(),
                row.scope.as_str(),
                row.category.as_str(),
                row.title,
                serde_json::to_string(&row.tags)?,
                serde_json::to_string(&row.related)?,
                row.project_path,
                row.status.as_str(),
                row.importance.clamp(1, 5) as i64,
                row.access_count as i64,
                row.content_hash,
                row.expires_at.map(timestamp),
                timestamp(row.created_at),
                timestamp(row.updated_at),
                row.accessed_at.map(timestamp),
                path,
            ],
        )
        .map_err(|e| Error::storage("index_upsert", e).with_path(&row.file_path))?;
        tx.commit().map_err(|e| Error::storage("index_upsert", e))?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<IndexRow>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {COLUMNS} FROM memory_index WHERE id = ?1"),
            [id],
            row_to_index,
        )
        .optional()
        .map_err(|e| Error::storage("index_get", e))
    }

    fn get_by_path(&self, path: &Path) -> Result<Option<IndexRow>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {COLUMNS} FROM memory_index WHERE file_path = ?1"),
            [path_text(path)],
            row_to_index,
        )
        .optional()
        .map_err(|e| Error::storage("index_get_by_path", e).with_path(path))
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn
            .execute("DELETE FROM memory_index WHERE id = ?1", [id])
            .map_err(|e| Error::storage("index_delete", e))?;
        Ok(n > 0)
    }

    fn query(&self, filter: &IndexFilter) -> Result<Vec<IndexRow>> {
        let mut params = Vec::new();
        let clause = filter_clause(filter, &mut params, "");
        let mut sql = format!("SELECT {COLUMNS} FROM memory_index WHERE 1=1{clause} ORDER BY created_at DESC");
        if let Some(limit) = filter.limit {
            params.push(Value::Integer(limit as i64));
            sql.push_str(&format!(" LIMIT ?{}", params.len()));
        }
        self.select("index_query", &sql, params)
    }

    fn expired(&self, now: DateTime<Utc>) -> Result<Vec<IndexRow>> {
        self.select(
            "index_expired",
            &format!(
                "SELECT {COLUMNS} FROM memory_index \
                 WHERE status = 'active' AND expires_at IS NOT NULL AND expires_at <= ?1 \
                 ORDER BY expires_at"
            ),
            vec![Value::Text(timestamp(now))],
        )
    }

    fn search(&self, query: &str, filter: &IndexFilter, limit: usize) -> Result<Vec<IndexRow>> {
        if self.fts {
            match self.fts_search(query, filter, limit) {
                Ok(rows) => return Ok(rows),
                Err(e) => {
                    tracing::warn!(error = %e, "fts query failed, falling back to substring search");
                }
            }
        }
        self.substring_search(query, filter, limit)
    }

    fn record_access(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        let n = conn
            .execute(
                "UPDATE memory_index SET access_count = access_count + 1, accessed_at = ?1 WHERE id = ?2",
                params![timestamp(at), id],
            )
            .map_err(|e| Error::storage("index_record_access", e))?;
        if n == 0 {
            return Err(Error::not_found("index_record_access", format!("no index row for {id}")));
        }
        Ok(())
    }

    fn count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM memory_index", [], |row| row.get(0))
            .map_err(|e| Error::storage("index_count", e))?;
        Ok(n as usize)
    }
}

// ── Row mapping ──────────────────────────────────────────────────────────────

/// Fixed-width UTC timestamps so SQL string comparison orders correctly.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn prefixed_columns(prefix: &str) -> String {
    COLUMNS
        .split(", ")
        .map(|c| format!("{prefix}{c}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        msg.into(),
    )
}

fn parse_enum<T: std::str::FromStr<Err = String>>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| conversion_error(idx, e))
}

fn parse_time(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e.to_string()))
}

fn parse_opt_time(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| conversion_error(idx, e.to_string()))
    })
    .transpose()
}

fn parse_list(row: &Row, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e.to_string()))
}

fn row_to_index(row: &Row) -> rusqlite::Result<IndexRow> {
    let path: String = row.get(16)?;
    Ok(IndexRow {
        id: row.get(0)?,
        tier: parse_enum(row, 1)?,
        scope: parse_enum(row, 2)?,
        category: parse_enum(row, 3)?,
        title: row.get(4)?,
        tags: parse_list(row, 5)?,
        related: parse_list(row, 6)?,
        project_path: row.get(7)?,
        status: parse_enum(row, 8)?,
        importance: row.get::<_, i64>(9)?.clamp(1, 5) as u8,
        access_count: row.get::<_, i64>(10)?.max(0) as u32,
        content_hash: row.get(11)?,
        expires_at: parse_opt_time(row, 12)?,
        created_at: parse_time(row, 13)?,
        updated_at: parse_time(row, 14)?,
        accessed_at: parse_opt_time(row, 15)?,
        file_path: PathBuf::from(path),
    })
}

/// Append ` AND ...` conditions for `filter`, pushing their parameters.
fn filter_clause(filter: &IndexFilter, params: &mut Vec<Value>, prefix: &str) -> String {
    let mut clause = String::new();
    let mut push = |column: &str, op: &str, value: Value| {
        params.push(value);
        clause.push_str(&format!(" AND {prefix}{column} {op} ?{}", params.len()));
    };
    if let Some(tier) = filter.tier {
        push("tier", "=", Value::Text(tier.as_str().into()));
    }
    if let Some(scope) = filter.scope {
        push("scope", "=", Value::Text(scope.as_str().into()));
    }
    if let Some(category) = filter.category {
        push("category", "=", Value::Text(category.as_str().into()));
    }
    if let Some(status) = filter.status {
        push("status", "=", Value::Text(status.as_str().into()));
    }
    if let Some(after) = filter.created_after {
        push("created_at", ">=", Value::Text(timestamp(after)));
    }
    if let Some(before) = filter.created_before {
        push("created_at", "<", Value::Text(timestamp(before)));
    }
    clause
}

/// Escape a user query for FTS5 MATCH syntax.
///
/// Each term is wrapped in double quotes so FTS5 never parses operators out of
/// user text; terms are OR-ed so partial matches still rank.
fn escape_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|word| {
            let clean = word.replace('"', "");
            format!("\"{clean}\"")
        })
        .filter(|w| w != "\"\"")
        .collect::<Vec<_>>()
        .join(" OR ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::{Category, Scope, Status, Tier};
    use std::collections::HashSet;

    fn row(id: &str, title: &str, tier: Tier, category: Category) -> IndexRow {
        let now = Utc::now();
        IndexRow {
            id: id.into(),
            tier,
            scope: Scope::Global,
            category,
            title: title.into(),
            tags: vec!["rust".into()],
            related: vec![],
            project_path: None,
            status: Status::Active,
            importance: 3,
            access_count: 0,
            content_hash: "h".into(),
            expires_at: None,
            created_at: now,
            updated_at: now,
            accessed_at: None,
            file_path: PathBuf::from(format!("/root/{id}.md")),
        }
    }

    #[test]
    fn escape_fts_query_quotes_terms() {
        assert_eq!(escape_fts_query("hello world"), "\"hello\" OR \"world\"");
        assert_eq!(escape_fts_query("say \"hi\""), "\"say\" OR \"hi\"");
        assert_eq!(escape_fts_query("   "), "");
        assert_eq!(escape_fts_query("AND OR NOT"), "\"AND\" OR \"OR\" OR \"NOT\"");
    }

    #[test]
    fn upsert_get_and_path_lookup() {
        let idx = SqliteIndex::open_in_memory().unwrap();
        let mut r = row("a", "Editor preference", Tier::Core, Category::Preference);
        idx.upsert(&r).unwrap();
        assert_eq!(idx.get("a").unwrap().unwrap().title, "Editor preference");

        r.title = "Editor choice".into();
        idx.upsert(&r).unwrap();
        assert_eq!(idx.count().unwrap(), 1);
        let by_path = idx.get_by_path(Path::new("/root/a.md")).unwrap().unwrap();
        assert_eq!(by_path.title, "Editor choice");
    }

    #[test]
    fn upsert_replaces_row_holding_same_path() {
        let idx = SqliteIndex::open_in_memory().unwrap();
        idx.upsert(&row("a", "first", Tier::LongTerm, Category::Knowledge)).unwrap();
        let mut other = row("b", "second", Tier::LongTerm, Category::Knowledge);
        other.file_path = PathBuf::from("/root/a.md");
        idx.upsert(&other).unwrap();
        assert!(idx.get("a").unwrap().is_none());
        assert_eq!(idx.count().unwrap(), 1);
    }

    #[test]
    fn fts_and_substring_search_agree() {
        let idx = SqliteIndex::open_in_memory().unwrap();
        assert!(idx.has_fts());
        idx.upsert(&row("a", "Tokio runtime tuning", Tier::LongTerm, Category::Knowledge)).unwrap();
        idx.upsert(&row("b", "Grocery list", Tier::ShortTerm, Category::Task)).unwrap();

        let filter = IndexFilter::default();
        let fts: Vec<String> = idx.search("tokio", &filter, 10).unwrap().into_iter().map(|r| r.id).collect();
        let sub: Vec<String> = idx
            .substring_search("tokio", &filter, 10)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(fts, vec!["a"]);
        assert_eq!(sub, vec!["a"]);

        let scoped = idx
            .search("tokio grocery", &IndexFilter::tier(Tier::ShortTerm), 10)
            .unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].id, "b");
    }

    #[test]
    fn expired_and_record_access() {
        let idx = SqliteIndex::open_in_memory().unwrap();
        let now = Utc::now();
        let mut past = row("old", "old task", Tier::ShortTerm, Category::Task);
        past.expires_at = Some(now - chrono::Duration::hours(1));
        let mut future = row("new", "new task", Tier::ShortTerm, Category::Task);
        future.expires_at = Some(now + chrono::Duration::hours(1));
        idx.upsert(&past).unwrap();
        idx.upsert(&future).unwrap();

        let expired: Vec<String> = idx.expired(now).unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(expired, vec!["old"]);

        idx.record_access("new", now).unwrap();
        idx.record_access("new", now).unwrap();
        let r = idx.get("new").unwrap().unwrap();
        assert_eq!(r.access_count, 2);
        assert!(r.accessed_at.is_some());
        assert!(idx.record_access("missing", now).unwrap_err().is_not_found());
    }

    #[test]
    fn orphans_and_counts() {
        let idx = SqliteIndex::open_in_memory().unwrap();
        idx.upsert(&row("a", "one", Tier::Core, Category::Rule)).unwrap();
        idx.upsert(&row("b", "two", Tier::LongTerm, Category::Decision)).unwrap();
        let existing: HashSet<PathBuf> = [PathBuf::from("/root/a.md")].into_iter().collect();
        let orphans: Vec<String> = idx.orphans(&existing).unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(orphans, vec!["b"]);

        let counts = idx.count_by_tier().unwrap();
        assert_eq!(counts.get(&Tier::Core), Some(&1));
        assert_eq!(counts.get(&Tier::LongTerm), Some(&1));
        assert!(idx.delete("a").unwrap());
        assert_eq!(idx.query(&IndexFilter::tier(Tier::Core)).unwrap().len(), 0);
    }
}
