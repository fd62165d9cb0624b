//! Papertrack Database Layer
//!
//! Embedded SQLite storage for the seen-paper ledger: every paper a query
//! has ever observed, keyed by `(source, source_id)` with a normalised DOI
//! for cross-source matching.
//!
//! # Example
//!
//! ```rust,no_run
//! use papertrack_db::{SeenPaper, SeenPaperRepository};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let repo = SeenPaperRepository::open("./database/papers.db")?;
//!     let fresh = repo.claim(&[SeenPaper::new("arxiv", "2401.00001")])?;
//!     assert_eq!(fresh, vec![true]);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod schema;
pub mod seen_papers;

pub use error::{DbError, Result};
pub use schema::{SeenPaper, StoredSeenPaper, SCHEMA_VERSION, TABLE_SEEN_PAPERS};
pub use seen_papers::SeenPaperRepository;
