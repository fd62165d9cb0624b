//! papertrack-common — Shared types, errors, and configuration used across all Papertrack crates.

pub mod error;
pub mod query;
pub mod config;
pub mod sandbox;

// Re-export commonly used types
pub use error::{PapertrackError, Result};
pub use query::{Field, FieldQuery, SearchQuery};
pub use config::{AppConfig, LogConfig, SearchSettings, StorageConfig, FetchWindow};
