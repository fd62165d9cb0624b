//! Paper feed clients.

pub mod arxiv;
pub mod crossref;
pub mod http;

pub use http::RetryPolicy;

use async_trait::async_trait;
use papertrack_common::{PapertrackError, SearchQuery};
use thiserror::Error;

use crate::models::{Paper, PaperSource};

/// One page request. Sort order is fixed by each feed to most-recently
/// updated first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Compiled provider search expression.
    pub query: String,
    pub start: usize,
    pub max_results: usize,
}

/// A parsed page of results.
#[derive(Debug, Clone, Default)]
pub struct FeedPage {
    pub papers: Vec<Paper>,
    /// Entries the provider returned, including ones that failed to parse.
    pub raw_count: usize,
    /// Entries dropped by the parser.
    pub skipped: usize,
}

impl FeedPage {
    /// A page where every raw entry parsed.
    pub fn from_papers(papers: Vec<Paper>) -> Self {
        let raw_count = papers.len();
        Self { papers, raw_count, skipped: 0 }
    }
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Request blocked: {0}")]
    Blocked(String),

    #[error("Malformed feed: {0}")]
    Malformed(String),
}

impl From<PapertrackError> for FeedError {
    fn from(err: PapertrackError) -> Self {
        match err {
            PapertrackError::Http(e) => FeedError::Transport(e),
            PapertrackError::SecurityError(msg) => FeedError::Blocked(msg),
            other => FeedError::Blocked(other.to_string()),
        }
    }
}

/// Common interface for paper feeds.
#[async_trait]
pub trait PaperFeed: Send + Sync {
    fn source(&self) -> PaperSource;

    /// Render a query (and optional global scope) in this feed's syntax.
    fn compile_query(&self, query: &SearchQuery, scope: Option<&SearchQuery>) -> String;

    /// Fetch one page, retrying transient failures internally.
    async fn fetch_page(&self, request: &PageRequest) -> Result<FeedPage, FeedError>;
}
