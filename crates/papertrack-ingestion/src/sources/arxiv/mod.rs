//! arXiv Atom API feed.
//!
//! - [`query`]: `SearchQuery` → `search_query` compiler
//! - [`client`]: HTTP client with retry and endpoint fallback
//! - [`parser`]: Atom XML → [`Paper`](crate::models::Paper)

pub mod client;
pub mod parser;
pub mod query;

pub use client::{ArxivClient, ARXIV_HTTP, ARXIV_HTTPS, SORT_BY, SORT_ORDER};
pub use parser::{parse_arxiv_feed, ParsedFeed};
pub use query::{compile, Expr};
