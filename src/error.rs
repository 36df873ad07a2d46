//! Error types for the WebInsight service.

use thiserror::Error;

/// Main error type for WebInsight operations.
#[derive(Error, Debug)]
pub enum WebInsightError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP server errors
    #[error("Server error: {0}")]
    Server(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for WebInsightError {
    fn from(err: config::ConfigError) -> Self {
        WebInsightError::Config(err.to_string())
    }
}

/// Result type alias for WebInsight operations.
pub type Result<T> = std::result::Result<T, WebInsightError>;
