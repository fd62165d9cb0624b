//! Crossref REST API feed.
//!
//! - [`query`]: `SearchQuery` → `query.*` parameters, plus the NOT post-filter
//! - [`client`]: HTTP client with retry
//! - [`parser`]: `/works` JSON → [`Paper`](crate::models::Paper)

pub mod client;
pub mod parser;
pub mod query;

pub use client::{crossref_retry, CrossrefClient, CROSSREF_WORKS};
pub use parser::{parse_crossref_works, ParsedWorks};
pub use query::{apply_not_filter, compile, not_terms};
