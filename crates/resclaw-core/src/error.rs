//! Error types shared across Resclaw crates.

use thiserror::Error;

/// Convenience result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, ResclawError>;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum ResclawError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Db(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
