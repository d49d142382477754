//! Error types for element registry and selector operations

use thiserror::Error;

/// Result type alias using ElementError
pub type Result<T> = std::result::Result<T, ElementError>;

/// Errors that can occur while managing captured elements
#[derive(Debug, Error)]
pub enum ElementError {
    /// No element with this id is registered
    #[error("Element not found: {0}")]
    NotFound(String),

    /// A locator string could not be parsed
    #[error("Invalid locator: {0}")]
    InvalidLocator(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ElementError {
    /// Create an invalid-locator error with a message
    pub fn invalid_locator(msg: impl Into<String>) -> Self {
        Self::InvalidLocator(msg.into())
    }
}
