//! Session backend errors.

use thiserror::Error;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// An error raised by a session store or while connecting to one.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The connection string is not a `scheme://host:port` URL.
    #[error("invalid connection string {url:?}: {message}")]
    InvalidUrl {
        /// The connection string.
        url: String,
        /// Why it was rejected.
        message: String,
    },

    /// No constructor is registered for the scheme.
    #[error("unsupported store scheme '{scheme}'")]
    UnsupportedScheme {
        /// The scheme.
        scheme: String,
    },

    /// The backend could not be reached or refused the operation.
    #[error("store unavailable: {message}")]
    Unavailable {
        /// Backend message.
        message: String,
    },

    /// A stored value could not be encoded or decoded.
    #[error("session value encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl StoreError {
    /// Creates an [`StoreError::Unavailable`] error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}
