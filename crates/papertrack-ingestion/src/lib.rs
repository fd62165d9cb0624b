//! papertrack-ingestion — incremental paper tracking.
//! - Feed sources (arXiv Atom API, Crossref REST API: query compilers, HTTP clients, parsers)
//! - Seen-paper ledger, DOI and title normalisation
//! - Time-windowed, deduplicating fetch engine
//! - Multi-query, multi-source tracking pipeline

pub mod sources;
pub mod dedup;
pub mod fetch;
pub mod models;
pub mod pipeline;
pub mod repository;

pub use dedup::{
    batch_key, normalize_doi, normalize_title, BatchKey, LedgerError, MemoryLedger, SeenLedger,
    SeenRecord,
};
pub use fetch::{EngineError, FetchEngine, FetchOutcome, FetchPhase, FetchState, StopReason};
pub use models::{Paper, PaperLinks, PaperSource};
pub use pipeline::{
    compile_all, merge_sources, run_tracking, CompiledQuery, QueryReport, SourceRun, TrackingJob,
    TrackingReport,
};
pub use repository::SqliteLedger;
pub use sources::{FeedError, FeedPage, PageRequest, PaperFeed, RetryPolicy};
