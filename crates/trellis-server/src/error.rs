//! Server errors.

use thiserror::Error;

/// An error that stops the server or prevents it from starting.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The bind address is invalid or already in use.
    #[error("Bind error: {0}")]
    Bind(String),

    /// I/O error while accepting connections.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A server setting has an invalid value.
    #[error("invalid server setting {key} = {value:?}")]
    Config {
        /// The setting.
        key: String,
        /// The rejected value.
        value: String,
    },
}
