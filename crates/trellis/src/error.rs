//! Deployment errors.

use thiserror::Error;
use trellis_config::ConfigError;
use trellis_core::TrellisError;
use trellis_router::RouterError;
use trellis_server::ServerError;
use trellis_telemetry::TelemetryError;

/// An error raised while loading, assembling or serving an application.
///
/// Every variant is fatal: a deployment that does not assemble does not
/// serve traffic.
#[derive(Debug, Error)]
pub enum DeployError {
    /// The configuration did not resolve.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A shell, route or mount could not be built.
    #[error(transparent)]
    Router(#[from] RouterError),

    /// The server could not start.
    #[error(transparent)]
    Server(#[from] ServerError),

    /// Logging could not be configured.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    /// A section names a factory nobody registered.
    #[error("unknown {kind} factory '{name}' in [{section}]")]
    UnknownFactory {
        /// `filter` or `app`.
        kind: &'static str,
        /// The factory name.
        name: String,
        /// Section naming it.
        section: String,
    },

    /// A registered factory refused its settings.
    #[error("factory '{name}' failed in [{section}]: {source}")]
    Factory {
        /// The factory name.
        name: String,
        /// Section being built.
        section: String,
        /// What the factory reported.
        #[source]
        source: TrellisError,
    },

    /// Components do not fit together, such as a pipeline ending in a filter.
    #[error("cannot assemble [{section}]: {message}")]
    Assembly {
        /// Section being built.
        section: String,
        /// What went wrong.
        message: String,
    },

    /// The application URI is malformed.
    #[error("invalid application URI '{uri}': {reason}")]
    InvalidUri {
        /// The URI as given.
        uri: String,
        /// Explanation.
        reason: String,
    },
}

impl DeployError {
    pub(crate) fn assembly(section: &str, message: impl Into<String>) -> Self {
        Self::Assembly {
            section: section.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = DeployError::UnknownFactory {
            kind: "filter",
            name: "auth".into(),
            section: "filter:auth".into(),
        };
        assert_eq!(err.to_string(), "unknown filter factory 'auth' in [filter:auth]");

        let err: DeployError = ConfigError::missing_key("app:main", "shell").into();
        assert_eq!(
            err.to_string(),
            "the [app:main] section is missing a 'shell' setting"
        );
    }
}
