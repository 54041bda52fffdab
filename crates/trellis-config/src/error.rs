//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading and resolving configuration.
///
/// All of these are fatal at startup: an application whose configuration
/// does not resolve must not serve traffic.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// Failed to read configuration file.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Malformed ini syntax.
    #[error("parse error on line {line}: {message}")]
    Parse {
        /// 1-based line number.
        line: usize,
        /// What was wrong.
        message: String,
    },

    /// A `%(name)s` reference could not be expanded.
    #[error("bad interpolation in [{section}] {option}: {reason}")]
    Interpolation {
        /// Section holding the option.
        section: String,
        /// The option being expanded.
        option: String,
        /// Explanation.
        reason: String,
    },

    /// No section with the requested type and name.
    #[error("no section named {name}")]
    SectionNotFound {
        /// Requested name, with its type prefix where known.
        name: String,
    },

    /// More than one section matches a name.
    #[error("ambiguous section name {name}: {candidates}")]
    AmbiguousSection {
        /// Requested name.
        name: String,
        /// Comma-separated matching sections.
        candidates: String,
    },

    /// A section lacks a key its type requires.
    #[error("the [{section}] section is missing a '{key}' setting")]
    MissingRequiredKey {
        /// Section name.
        section: String,
        /// The required key.
        key: String,
    },

    /// A section carries keys its type does not allow.
    #[error("the [{section}] section has extra (disallowed) settings: {keys}")]
    ExtraSettings {
        /// Section name.
        section: String,
        /// Comma-separated offending keys.
        keys: String,
    },

    /// A section names neither `use` nor an explicit factory.
    #[error("no factory given in section [{section}]")]
    NoFactory {
        /// Section name.
        section: String,
    },

    /// A reference could not be resolved.
    #[error("unresolved reference {reference} in [{section}]")]
    UnresolvedReference {
        /// Section (or key) holding the reference.
        section: String,
        /// The reference text.
        reference: String,
    },

    /// A `require` entry is not provided by this process.
    #[error("required dependency is unavailable: {requirement}")]
    DependencyUnavailable {
        /// The `require` entry as written.
        requirement: String,
    },

    /// Resolution came back to a node already being resolved.
    #[error("configuration cycle detected: {chain}")]
    CycleDetected {
        /// The resolution chain, outermost first.
        chain: String,
    },

    /// Resolution nested deeper than allowed.
    #[error("configuration nested deeper than {depth} levels")]
    DepthExceeded {
        /// The limit that was hit.
        depth: usize,
    },

    /// Invalid configuration value.
    #[error("invalid configuration value for {field}: {reason}")]
    InvalidValue {
        /// The field with the invalid value.
        field: String,
        /// Explanation of why the value is invalid.
        reason: String,
    },

    /// File watching failed.
    #[error("file watcher error: {message}")]
    Watch {
        /// Description of the failure.
        message: String,
    },
}

impl ConfigError {
    /// Create a new file not found error.
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Create a new read error.
    pub fn read_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadError {
            path: path.into(),
            source,
        }
    }

    /// Create a new parse error.
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    /// Create a new missing key error.
    pub fn missing_key(section: impl Into<String>, key: impl Into<String>) -> Self {
        Self::MissingRequiredKey {
            section: section.into(),
            key: key.into(),
        }
    }

    /// Create a new unresolved reference error.
    pub fn unresolved(section: impl Into<String>, reference: impl Into<String>) -> Self {
        Self::UnresolvedReference {
            section: section.into(),
            reference: reference.into(),
        }
    }

    /// Create a new invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
