//! arXiv Atom API client.
//!
//! Endpoint: https://export.arxiv.org/api/query
//!
//! Requests are retried with exponential backoff on timeouts, connection
//! failures and 429/5xx responses; each attempt gets a longer timeout than
//! the last. When an endpoint gives up, the next one (plain HTTP) is tried.

use async_trait::async_trait;
use papertrack_common::sandbox::SandboxClient;
use papertrack_common::SearchQuery;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::parser::parse_arxiv_feed;
use super::query::compile;
use crate::models::PaperSource;
use crate::sources::http::{get_with_retry, RequestHeaders, RetryPolicy};
use crate::sources::{FeedError, FeedPage, PageRequest, PaperFeed};

pub const ARXIV_HTTPS: &str = "https://export.arxiv.org/api/query";
pub const ARXIV_HTTP: &str = "http://export.arxiv.org/api/query";

/// Fixed: the fetch engine's stop rules assume newest-updated first.
pub const SORT_BY: &str = "lastUpdatedDate";
pub const SORT_ORDER: &str = "descending";

const HEADERS: RequestHeaders = RequestHeaders {
    user_agent: "papertrack/0.1",
    accept: "application/atom+xml,application/xml;q=0.9,*/*;q=0.8",
};

pub struct ArxivClient {
    client: SandboxClient,
    endpoints: Vec<String>,
    retry: RetryPolicy,
    keep_version: bool,
}

impl ArxivClient {
    /// Client for the public arXiv API (HTTPS, then HTTP).
    pub fn new(keep_version: bool) -> Result<Self, FeedError> {
        Self::with_endpoints(
            vec![ARXIV_HTTPS.to_string(), ARXIV_HTTP.to_string()],
            RetryPolicy::default(),
            keep_version,
        )
    }

    /// Client for custom endpoints, tried in order.
    pub fn with_endpoints(
        endpoints: Vec<String>,
        retry: RetryPolicy,
        keep_version: bool,
    ) -> Result<Self, FeedError> {
        let client = SandboxClient::new(Duration::from_secs(10))?;
        Ok(Self { client, endpoints, retry, keep_version })
    }

    /// Raw Atom XML for one page.
    #[instrument(skip(self, request), fields(start = request.start, max_results = request.max_results))]
    pub async fn fetch_feed(&self, request: &PageRequest) -> Result<String, FeedError> {
        let params = [
            ("search_query", request.query.clone()),
            ("start", request.start.to_string()),
            ("max_results", request.max_results.to_string()),
            ("sortBy", SORT_BY.to_string()),
            ("sortOrder", SORT_ORDER.to_string()),
        ];

        let mut last_err = None;
        for endpoint in &self.endpoints {
            match get_with_retry(&self.client, endpoint, &params, HEADERS, &self.retry).await {
                Ok(body) => {
                    debug!(endpoint = %endpoint, bytes = body.len(), "arXiv response ok");
                    return Ok(body);
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "arXiv endpoint failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| FeedError::Blocked("no arXiv endpoint configured".to_string())))
    }
}

#[async_trait]
impl PaperFeed for ArxivClient {
    fn source(&self) -> PaperSource {
        PaperSource::Arxiv
    }

    fn compile_query(&self, query: &SearchQuery, scope: Option<&SearchQuery>) -> String {
        compile(query, scope)
    }

    async fn fetch_page(&self, request: &PageRequest) -> Result<FeedPage, FeedError> {
        let xml = self.fetch_feed(request).await?;
        let feed = parse_arxiv_feed(&xml, self.keep_version)?;
        info!(
            start = request.start,
            entries = feed.raw_entries,
            parsed = feed.papers.len(),
            skipped = feed.skipped,
            total = ?feed.total_results,
            "Fetched arXiv page"
        );
        Ok(feed.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disallowed_endpoint_is_blocked() {
        let client = ArxivClient::with_endpoints(
            vec!["https://example.com/api/query".to_string()],
            RetryPolicy::default(),
            false,
        )
        .unwrap();
        let request = PageRequest { query: "ti:x".to_string(), start: 0, max_results: 1 };
        let err = client.fetch_feed(&request).await.unwrap_err();
        assert!(matches!(err, FeedError::Blocked(_)));
    }
}
