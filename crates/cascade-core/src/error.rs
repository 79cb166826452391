//! Error types and result aliases for Cascade.
//!
//! This module defines the shared error types used across all Cascade
//! components. Errors are structured for programmatic handling and include
//! context for debugging.

/// The result type used throughout Cascade.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in core Cascade operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An opaque cursor could not be decoded.
    #[error("invalid cursor: {message}")]
    InvalidCursor {
        /// Description of what made the cursor invalid.
        message: String,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A path or object was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The operation was cancelled through its context handle.
    #[error("cancelled")]
    Cancelled,

    /// The operation outlived its deadline.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new invalid-cursor error.
    #[must_use]
    pub fn invalid_cursor(message: impl Into<String>) -> Self {
        Self::InvalidCursor {
            message: message.into(),
        }
    }

    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
