//! Crossref REST API client.
//!
//! Endpoint: https://api.crossref.org/works
//!
//! Paged with `rows`/`offset`, sorted by `updated` descending. NOT terms are
//! enforced on each parsed page; papers they drop count as skipped so the
//! engine still sees the provider's raw page size.

use async_trait::async_trait;
use papertrack_common::sandbox::SandboxClient;
use papertrack_common::SearchQuery;
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::parser::parse_crossref_works;
use super::query::{apply_not_filter, compile, decode, not_terms};
use crate::models::PaperSource;
use crate::sources::http::{get_with_retry, RequestHeaders, RetryPolicy};
use crate::sources::{FeedError, FeedPage, PageRequest, PaperFeed};

pub const CROSSREF_WORKS: &str = "https://api.crossref.org/works";

const HEADERS: RequestHeaders = RequestHeaders {
    user_agent: "papertrack/0.1",
    accept: "application/json",
};

/// Crossref's retry budget: fewer, shorter attempts than arXiv.
pub fn crossref_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 4,
        base_delay: Duration::from_millis(800),
        max_delay: Duration::from_secs(8),
        jitter: Duration::from_millis(300),
        timeout: Duration::from_secs(30),
        timeout_multiplier: 1.0,
    }
}

pub struct CrossrefClient {
    client: SandboxClient,
    endpoint: String,
    retry: RetryPolicy,
}

impl CrossrefClient {
    pub fn new() -> Result<Self, FeedError> {
        Self::with_endpoint(CROSSREF_WORKS.to_string(), crossref_retry())
    }

    pub fn with_endpoint(endpoint: String, retry: RetryPolicy) -> Result<Self, FeedError> {
        let client = SandboxClient::new(Duration::from_secs(10))?;
        Ok(Self { client, endpoint, retry })
    }

    /// Raw `/works` JSON for one page.
    #[instrument(skip(self, request), fields(offset = request.start, rows = request.max_results))]
    pub async fn fetch_works(&self, request: &PageRequest) -> Result<String, FeedError> {
        let compiled = decode(&request.query);
        let mut params: Vec<(&str, String)> = vec![
            ("rows", request.max_results.to_string()),
            ("offset", request.start.to_string()),
            ("sort", "updated".to_string()),
            ("order", "desc".to_string()),
        ];
        params.extend(
            compiled
                .iter()
                .filter(|(k, v)| !k.trim().is_empty() && !v.trim().is_empty())
                .map(|(k, v)| (k.as_str(), v.trim().to_string())),
        );

        let body = get_with_retry(&self.client, &self.endpoint, &params, HEADERS, &self.retry).await?;
        debug!(bytes = body.len(), "Crossref response ok");
        Ok(body)
    }
}

#[async_trait]
impl PaperFeed for CrossrefClient {
    fn source(&self) -> PaperSource {
        PaperSource::Crossref
    }

    fn compile_query(&self, query: &SearchQuery, scope: Option<&SearchQuery>) -> String {
        compile(query, scope)
    }

    async fn fetch_page(&self, request: &PageRequest) -> Result<FeedPage, FeedError> {
        let body = self.fetch_works(request).await?;
        let works = parse_crossref_works(&body)?;
        let total = works.total_results;
        let mut page: FeedPage = works.into();

        let (kept, dropped) = apply_not_filter(page.papers, &not_terms(&request.query));
        page.papers = kept;
        page.skipped += dropped;

        info!(
            offset = request.start,
            items = page.raw_count,
            parsed = page.papers.len(),
            skipped = page.skipped,
            not_filtered = dropped,
            total = ?total,
            "Fetched Crossref page"
        );
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crossref_retry_budget() {
        let policy = crossref_retry();
        assert_eq!(policy.backoff(1), Duration::from_millis(800));
        assert_eq!(policy.backoff(4), Duration::from_millis(6400));
        assert_eq!(policy.backoff(5), Duration::from_secs(8));
        assert_eq!(policy.timeout_for(3), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_disallowed_endpoint_is_blocked() {
        let client =
            CrossrefClient::with_endpoint("https://example.com/works".to_string(), crossref_retry())
                .unwrap();
        let request = PageRequest { query: String::new(), start: 0, max_results: 1 };
        assert!(matches!(client.fetch_works(&request).await, Err(FeedError::Blocked(_))));
    }
}
