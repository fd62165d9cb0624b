//! Deduplication logic for tracked papers.
//!
//! Two keys decide whether a paper has been seen before:
//! 1. `(source, source_id)`: exact, authoritative.
//! 2. normalised DOI: a best-effort match across sources that share no id.
//!
//! Within one merged batch, [`batch_key`] additionally folds together papers
//! whose normalised titles and years agree.
//!
//! The ledger is passed explicitly into the fetch engine; there is no
//! process-wide store.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use thiserror::Error;

use crate::models::Paper;

/// Resolver prefixes stripped before comparing DOIs. Checked in order.
const DOI_PREFIXES: [&str; 5] = [
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
    "doi:",
];

/// Canonical form of a DOI for cross-source matching.
///
/// Strips resolver URLs and a literal `doi:` marker, trims and lowercases.
/// Absent or blank input yields `None`, never an empty string.
pub fn normalize_doi(raw: Option<&str>) -> Option<String> {
    let mut doi = raw?.trim();
    for prefix in DOI_PREFIXES {
        let matches = doi
            .get(..prefix.len())
            .map_or(false, |head| head.eq_ignore_ascii_case(prefix));
        if matches {
            doi = doi[prefix.len()..].trim_start();
        }
    }
    let doi = doi.trim().to_lowercase();
    (!doi.is_empty()).then_some(doi)
}

/// Titles shorter than this after normalising are too generic to match on.
pub const TITLE_MATCH_MIN_LEN: usize = 24;

/// Lowercase, replace anything outside `[a-z0-9 ]` with a space, collapse
/// whitespace.
pub fn normalize_title(title: &str) -> String {
    let mapped: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { ' ' })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Identity of a paper inside one merged multi-source batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BatchKey {
    Doi(String),
    Title { title: String, year: i32 },
}

/// DOI when present; otherwise a long enough title plus the publication
/// year. `None` means the paper only matches itself.
pub fn batch_key(paper: &Paper) -> Option<BatchKey> {
    if let Some(doi) = paper.doi_norm() {
        return Some(BatchKey::Doi(doi));
    }
    let title = normalize_title(&paper.title);
    if title.len() < TITLE_MATCH_MIN_LEN {
        return None;
    }
    let year = paper.published.or(paper.updated)?.year();
    Some(BatchKey::Title { title, year })
}

/// One ledger entry. `first_seen_at` is assigned by the ledger on first insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenRecord {
    pub source: String,
    pub source_id: String,
    pub doi: Option<String>,
    pub doi_norm: Option<String>,
    pub title: Option<String>,
}

impl SeenRecord {
    pub fn from_paper(paper: &Paper) -> Self {
        let title = paper.title.trim();
        Self {
            source: paper.source.as_str().to_string(),
            source_id: paper.source_id.clone(),
            doi: paper.doi.clone(),
            doi_norm: paper.doi_norm(),
            title: (!title.is_empty()).then(|| title.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger storage error: {0}")]
    Storage(#[from] papertrack_db::DbError),

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

/// Persistent record of every paper any query has observed.
///
/// Implementations must be safe to share between concurrently running
/// queries. [`SeenLedger::claim`] is the call the engine uses; backends that
/// can make check-and-mark atomic should override it.
#[async_trait]
pub trait SeenLedger: Send + Sync {
    async fn is_seen(&self, source: &str, source_id: &str) -> Result<bool, LedgerError>;

    /// Whether `doi_norm` is recorded under a source other than `source`.
    async fn is_seen_doi(&self, _doi_norm: &str, _source: &str) -> Result<bool, LedgerError> {
        Ok(false)
    }

    async fn mark_seen(&self, records: &[SeenRecord]) -> Result<(), LedgerError>;

    /// Report, per paper, whether it was previously unseen, and mark all of
    /// them seen. A paper repeated within `papers` is new at most once.
    async fn claim(&self, papers: &[Paper]) -> Result<Vec<bool>, LedgerError> {
        let mut verdicts = Vec::with_capacity(papers.len());
        let mut in_batch: HashSet<(&str, &str)> = HashSet::new();

        for paper in papers {
            let source = paper.source.as_str();
            let fresh = if !in_batch.insert((source, paper.source_id.as_str())) {
                false
            } else if self.is_seen(source, &paper.source_id).await? {
                false
            } else {
                match paper.doi_norm() {
                    Some(doi) => !self.is_seen_doi(&doi, source).await?,
                    None => true,
                }
            };
            verdicts.push(fresh);
        }

        let records: Vec<SeenRecord> = papers.iter().map(SeenRecord::from_paper).collect();
        self.mark_seen(&records).await?;
        Ok(verdicts)
    }
}

// ── In-memory ledger ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct MemoryState {
    ids: HashMap<(String, String), DateTime<Utc>>,
    /// doi_norm -> sources it was recorded under
    dois: HashMap<String, HashSet<String>>,
}

impl MemoryState {
    fn is_seen_doi(&self, doi_norm: &str, source: &str) -> bool {
        self.dois
            .get(doi_norm)
            .map_or(false, |sources| sources.iter().any(|s| s != source))
    }

    fn record(&mut self, record: &SeenRecord) {
        self.ids
            .entry((record.source.clone(), record.source_id.clone()))
            .or_insert_with(Utc::now);
        if let Some(doi) = &record.doi_norm {
            self.dois
                .entry(doi.clone())
                .or_default()
                .insert(record.source.clone());
        }
    }
}

/// Process-local ledger for tests and runs without storage.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<MemoryState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger pre-populated with already-seen records.
    pub fn with_records(records: &[SeenRecord]) -> Self {
        let mut state = MemoryState::default();
        for record in records {
            state.record(record);
        }
        Self { state: Mutex::new(state) }
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.ids.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, LedgerError> {
        self.state
            .lock()
            .map_err(|_| LedgerError::Unavailable("memory ledger lock poisoned".to_string()))
    }
}

#[async_trait]
impl SeenLedger for MemoryLedger {
    async fn is_seen(&self, source: &str, source_id: &str) -> Result<bool, LedgerError> {
        let state = self.lock()?;
        Ok(state.ids.contains_key(&(source.to_string(), source_id.to_string())))
    }

    async fn is_seen_doi(&self, doi_norm: &str, source: &str) -> Result<bool, LedgerError> {
        Ok(self.lock()?.is_seen_doi(doi_norm, source))
    }

    async fn mark_seen(&self, records: &[SeenRecord]) -> Result<(), LedgerError> {
        let mut state = self.lock()?;
        for record in records {
            state.record(record);
        }
        Ok(())
    }

    /// Check and mark under a single lock.
    async fn claim(&self, papers: &[Paper]) -> Result<Vec<bool>, LedgerError> {
        let mut state = self.lock()?;
        let mut verdicts = Vec::with_capacity(papers.len());
        for paper in papers {
            let record = SeenRecord::from_paper(paper);
            let key = (record.source.clone(), record.source_id.clone());
            let fresh = !state.ids.contains_key(&key)
                && !record
                    .doi_norm
                    .as_deref()
                    .map_or(false, |doi| state.is_seen_doi(doi, &record.source));
            state.record(&record);
            verdicts.push(fresh);
        }
        Ok(verdicts)
    }
}
