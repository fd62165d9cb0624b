use thiserror::Error;

#[derive(Debug, Error)]
pub enum PapertrackError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Security error: {0}")]
    SecurityError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PapertrackError {
    /// Shorthand for a configuration error carrying the offending key path.
    pub fn config(msg: impl Into<String>) -> Self {
        PapertrackError::Config(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, PapertrackError>;
