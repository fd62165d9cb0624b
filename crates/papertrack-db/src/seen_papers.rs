//! Seen-paper repository.
//!
//! Thread-safe via an internal `Mutex<Connection>`. Every call takes the
//! lock, so a [`SeenPaperRepository::claim`] is atomic with respect to every
//! other call on the same handle.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::debug;

use crate::error::{DbError, Result};
use crate::schema::{apply_schema, read_schema_version, SeenPaper, StoredSeenPaper};

const UPSERT_SQL: &str = "
INSERT INTO seen_papers (source, source_id, doi, doi_norm, title, first_seen_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
ON CONFLICT(source, source_id) DO UPDATE SET
    doi      = COALESCE(excluded.doi, seen_papers.doi),
    doi_norm = COALESCE(excluded.doi_norm, seen_papers.doi_norm),
    title    = COALESCE(excluded.title, seen_papers.title)";

pub struct SeenPaperRepository {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl SeenPaperRepository {
    /// Open (or create) the database file, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        apply_schema(&conn)?;
        debug!(path = %path.display(), "Opened seen-paper database");
        Ok(Self {
            path: Some(path.to_path_buf()),
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self { path: None, conn: Mutex::new(conn) })
    }

    /// File backing this repository; `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn schema_version(&self) -> Result<Option<u32>> {
        let conn = self.lock()?;
        Ok(read_schema_version(&conn)?)
    }

    /// Whether `(source, source_id)` has been recorded.
    pub fn contains(&self, source: &str, source_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        Ok(contains_id(&conn, source, source_id)?)
    }

    /// Whether `doi_norm` has been recorded, optionally ignoring rows from
    /// `exclude_source`.
    pub fn contains_doi(&self, doi_norm: &str, exclude_source: Option<&str>) -> Result<bool> {
        let conn = self.lock()?;
        Ok(contains_doi(&conn, doi_norm, exclude_source)?)
    }

    /// Record papers as seen. Existing rows keep `first_seen_at`; missing
    /// title/doi are filled in from the new row.
    pub fn upsert(&self, papers: &[SeenPaper]) -> Result<usize> {
        if papers.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        for paper in papers {
            upsert_one(&tx, paper, &now)?;
        }
        tx.commit()?;
        Ok(papers.len())
    }

    /// Check-and-mark in one transaction.
    ///
    /// Returns, per input row, whether the paper was previously unseen: its
    /// `(source, source_id)` was unknown and its `doi_norm` (if any) was not
    /// recorded under another source. Every row is recorded regardless, so a
    /// repeated id later in the same batch reports `false`.
    pub fn claim(&self, papers: &[SeenPaper]) -> Result<Vec<bool>> {
        if papers.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        let mut fresh = Vec::with_capacity(papers.len());
        for paper in papers {
            let seen_id = contains_id(&tx, &paper.source, &paper.source_id)?;
            let seen_doi = match paper.doi_norm.as_deref() {
                Some(doi) if !seen_id => contains_doi(&tx, doi, Some(&paper.source))?,
                _ => false,
            };
            fresh.push(!seen_id && !seen_doi);
            upsert_one(&tx, paper, &now)?;
        }
        tx.commit()?;
        debug!(
            rows = papers.len(),
            fresh = fresh.iter().filter(|f| **f).count(),
            "Claimed seen papers"
        );
        Ok(fresh)
    }

    pub fn get(&self, source: &str, source_id: &str) -> Result<Option<StoredSeenPaper>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT source, source_id, doi, doi_norm, title, first_seen_at
                 FROM seen_papers WHERE source = ?1 AND source_id = ?2",
                params![source, source_id],
                |row| {
                    Ok((
                        SeenPaper {
                            source: row.get(0)?,
                            source_id: row.get(1)?,
                            doi: row.get(2)?,
                            doi_norm: row.get(3)?,
                            title: row.get(4)?,
                        },
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(paper, first_seen_at)| {
            let first_seen_at = DateTime::parse_from_rfc3339(&first_seen_at)
                .map_err(|e| DbError::InvalidData(format!("first_seen_at: {e}")))?
                .with_timezone(&Utc);
            Ok::<_, DbError>(StoredSeenPaper { paper, first_seen_at })
        })
        .transpose()
    }

    /// Number of recorded papers.
    pub fn count(&self) -> Result<u64> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM seen_papers", [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }
}

fn contains_id(conn: &Connection, source: &str, source_id: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM seen_papers WHERE source = ?1 AND source_id = ?2)",
        params![source, source_id],
        |row| row.get(0),
    )
}

fn contains_doi(
    conn: &Connection,
    doi_norm: &str,
    exclude_source: Option<&str>,
) -> rusqlite::Result<bool> {
    match exclude_source {
        Some(source) => conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM seen_papers WHERE doi_norm = ?1 AND source <> ?2)",
            params![doi_norm, source],
            |row| row.get(0),
        ),
        None => conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM seen_papers WHERE doi_norm = ?1)",
            params![doi_norm],
            |row| row.get(0),
        ),
    }
}

fn upsert_one(tx: &Transaction<'_>, paper: &SeenPaper, now: &str) -> rusqlite::Result<()> {
    tx.execute(
        UPSERT_SQL,
        params![
            paper.source,
            paper.source_id,
            paper.doi,
            paper.doi_norm,
            paper.title,
            now
        ],
    )?;
    Ok(())
}
