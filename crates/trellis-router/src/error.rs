//! Errors raised while building route tables and URL maps.
//!
//! These are assembly-time failures. Request-time failures are
//! [`TrellisError`] values produced by the table lookup or the handlers.

use thiserror::Error;
use trellis_core::TrellisError;

/// An error raised while assembling routes, shells or URL maps.
#[derive(Debug, Error)]
pub enum RouterError {
    /// A route pattern is not a valid regular expression.
    #[error("invalid route pattern {pattern:?}: {source}")]
    InvalidPattern {
        /// The pattern as written.
        pattern: String,
        /// The regex compiler error.
        #[source]
        source: regex::Error,
    },

    /// A route names a content type that is not a valid media type.
    #[error("invalid content type {content_type:?} on route {pattern:?}")]
    InvalidContentType {
        /// The route pattern.
        pattern: String,
        /// The offending content type.
        content_type: String,
    },

    /// A shell lists a model that nothing registered.
    #[error("unknown model '{name}'")]
    UnknownModel {
        /// The model identifier.
        name: String,
    },

    /// A shell already holds a model instance under this name.
    #[error("model '{name}' is already loaded in shell '{shell}'")]
    DuplicateModel {
        /// The shell.
        shell: String,
        /// The model instance name.
        name: String,
    },

    /// A model failed to initialize from its configuration.
    #[error("model '{name}' failed to initialize: {source}")]
    Model {
        /// The model instance name.
        name: String,
        /// The failure reported by the model.
        #[source]
        source: TrellisError,
    },

    /// A URL map mount expression could not be parsed.
    #[error("invalid mount path {path:?}: {message}")]
    InvalidMount {
        /// The expression as written.
        path: String,
        /// What is wrong with it.
        message: String,
    },
}
