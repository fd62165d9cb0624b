//! Table definitions and row types.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

pub const TABLE_SEEN_PAPERS: &str = "seen_papers";

/// Bumped whenever the DDL below changes shape.
pub const SCHEMA_VERSION: u32 = 1;

/// `IF NOT EXISTS` throughout, so applying twice is a no-op.
pub(crate) const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS seen_papers (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    source        TEXT NOT NULL,
    source_id     TEXT NOT NULL,
    doi           TEXT,
    doi_norm      TEXT,              -- lowercased, resolver prefix stripped
    title         TEXT,
    first_seen_at TEXT NOT NULL,     -- RFC 3339, UTC
    UNIQUE(source, source_id)
);

CREATE INDEX IF NOT EXISTS idx_seen_papers_doi_norm ON seen_papers(doi_norm);
"#;

pub(crate) fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        rusqlite::params![SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

/// Returns `None` when the version row is missing or unparsable.
pub(crate) fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<u32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_meta WHERE key = 'schema_version'")?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().ok())
        }
        None => Ok(None),
    }
}

/// A paper to record as seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenPaper {
    pub source: String,
    pub source_id: String,
    pub doi: Option<String>,
    /// Normalised DOI used for cross-source matching.
    pub doi_norm: Option<String>,
    pub title: Option<String>,
}

impl SeenPaper {
    pub fn new(source: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            source_id: source_id.into(),
            doi: None,
            doi_norm: None,
            title: None,
        }
    }

    pub fn with_doi(mut self, doi: impl Into<String>, doi_norm: impl Into<String>) -> Self {
        self.doi = Some(doi.into());
        self.doi_norm = Some(doi_norm.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// A row read back from `seen_papers`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSeenPaper {
    pub paper: SeenPaper,
    pub first_seen_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        apply_schema(&conn).unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), Some(SCHEMA_VERSION));
    }

    #[test]
    fn test_seen_papers_table_exists() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [TABLE_SEEN_PAPERS],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_missing_version_row_reads_none() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE schema_meta (key TEXT PRIMARY KEY, value TEXT NOT NULL);")
            .unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), None);
    }
}
