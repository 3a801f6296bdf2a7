//! Error types shared across devrank crates

use thiserror::Error;

/// Result type alias for devrank operations
pub type Result<T> = std::result::Result<T, DevrankError>;

/// Main error type for devrank
#[derive(Error, Debug)]
pub enum DevrankError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid subject key '{key}': {reason}")]
    InvalidSubjectKey { key: String, reason: &'static str },

    #[error("Invalid job kind: {0}")]
    InvalidJobKind(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl DevrankError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
