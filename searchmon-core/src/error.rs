//! Error types for searchmon-core

use thiserror::Error;

/// Main error type for the searchmon-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Visit feed failure (transient; the core never retries)
    #[error("visit feed error: {0}")]
    Feed(String),

    /// Daily aggregate store is inconsistent
    #[error("aggregate cache error: {0}")]
    Cache(String),

    /// Period or date expression could not be interpreted
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

/// Result type alias for searchmon-core
pub type Result<T> = std::result::Result<T, Error>;
