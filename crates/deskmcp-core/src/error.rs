//! Error types for deskmcp

use thiserror::Error;

/// Main error type for deskmcp operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Malformed message: {0}")]
    InvalidMessage(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias using deskmcp's Error
pub type Result<T> = std::result::Result<T, Error>;
