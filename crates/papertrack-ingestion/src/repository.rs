//! SQLite-backed seen-paper ledger.
//!
//! Thin async adapter over `papertrack_db::SeenPaperRepository`. SQLite
//! calls are blocking, so each one runs on the blocking pool.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use papertrack_db::{SeenPaper, SeenPaperRepository};

use crate::dedup::{LedgerError, SeenLedger, SeenRecord};
use crate::models::Paper;

#[derive(Clone)]
pub struct SqliteLedger {
    repo: Arc<SeenPaperRepository>,
}

impl SqliteLedger {
    pub fn new(repo: Arc<SeenPaperRepository>) -> Self {
        Self { repo }
    }

    /// Open (or create) the ledger database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let repo = SeenPaperRepository::open(path)?;
        Ok(Self::new(Arc::new(repo)))
    }

    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Ok(Self::new(Arc::new(SeenPaperRepository::open_in_memory()?)))
    }

    pub fn repository(&self) -> &SeenPaperRepository {
        &self.repo
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, LedgerError>
    where
        T: Send + 'static,
        F: FnOnce(&SeenPaperRepository) -> papertrack_db::Result<T> + Send + 'static,
    {
        let repo = Arc::clone(&self.repo);
        tokio::task::spawn_blocking(move || f(repo.as_ref()))
            .await
            .map_err(|e| LedgerError::Unavailable(format!("ledger task failed: {e}")))?
            .map_err(LedgerError::from)
    }
}

fn to_row(record: &SeenRecord) -> SeenPaper {
    SeenPaper {
        source: record.source.clone(),
        source_id: record.source_id.clone(),
        doi: record.doi.clone(),
        doi_norm: record.doi_norm.clone(),
        title: record.title.clone(),
    }
}

#[async_trait]
impl SeenLedger for SqliteLedger {
    async fn is_seen(&self, source: &str, source_id: &str) -> Result<bool, LedgerError> {
        let (source, source_id) = (source.to_string(), source_id.to_string());
        self.blocking(move |repo| repo.contains(&source, &source_id)).await
    }

    async fn is_seen_doi(&self, doi_norm: &str, source: &str) -> Result<bool, LedgerError> {
        let (doi_norm, source) = (doi_norm.to_string(), source.to_string());
        self.blocking(move |repo| repo.contains_doi(&doi_norm, Some(&source))).await
    }

    async fn mark_seen(&self, records: &[SeenRecord]) -> Result<(), LedgerError> {
        let rows: Vec<SeenPaper> = records.iter().map(to_row).collect();
        let written = self.blocking(move |repo| repo.upsert(&rows)).await?;
        debug!(rows = written, "Marked papers seen");
        Ok(())
    }

    /// One transaction per page.
    async fn claim(&self, papers: &[Paper]) -> Result<Vec<bool>, LedgerError> {
        let rows: Vec<SeenPaper> = papers
            .iter()
            .map(|p| to_row(&SeenRecord::from_paper(p)))
            .collect();
        self.blocking(move |repo| repo.claim(&rows)).await
    }
}
