//! Logging setup for Trellis services.
//!
//! Every Trellis crate emits structured events through `tracing`. This crate
//! installs the subscriber that renders them: JSON lines for production,
//! pretty or compact text for development, written to stderr or appended to
//! a log file.
//!
//! The deployment loader builds a [`LogConfig`] from the `[DEFAULT]` section
//! of the ini file (`log_level`, `log_format`, `log_path`) when a platform
//! section is started.
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_telemetry::{init_logging, LogConfig};
//!
//! let config = LogConfig::production().with_level("info,trellis_router=debug");
//! init_logging(&config)?;
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod logging;

pub use error::TelemetryError;
pub use logging::{create_env_filter, init_logging, LogConfig, LogFormat};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
