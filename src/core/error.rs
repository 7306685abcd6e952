// Error Types for Flowscope
// One enum per crate boundary; recover locally wherever the pipeline can
// keep making progress

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Trade source failures. Only `Fatal` stops the pipeline (exit code 2);
/// everything else is retried with backoff.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("transient source error: {0}")]
    Transient(String),
    #[error("fatal source error: {0}")]
    Fatal(String),
}

impl SourceError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, SourceError::Fatal(_))
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed row: {0}")]
    MalformedRow(String),
}
