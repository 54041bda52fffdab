//! Structured logging for Trellis.
//!
//! Installs a global `tracing-subscriber` from a [`LogConfig`]. The config is
//! usually built from the `[DEFAULT]` keys of a deployment file:
//!
//! ```ini
//! [DEFAULT]
//! log_level = info,trellis_router=debug
//! log_format = json
//! log_path = /var/log/app.log
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_telemetry::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::development())?;
//! tracing::info!(mount = "/api", "application loaded");
//! ```

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;

use crate::error::TelemetryError;
use crate::TelemetryResult;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};
use trellis_core::Settings;

/// Setting key for the filter directive.
pub const LOG_LEVEL_KEY: &str = "log_level";
/// Setting key for the output format.
pub const LOG_FORMAT_KEY: &str = "log_format";
/// Setting key for the log file.
pub const LOG_PATH_KEY: &str = "log_path";

/// Output format of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Multi-line human-readable output.
    Pretty,
    /// Single-line human-readable output.
    Compact,
}

impl FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" | "text" => Ok(Self::Compact),
            other => Err(TelemetryError::InvalidConfig(format!(
                "unknown log format '{other}'"
            ))),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Whether logging is enabled.
    pub enabled: bool,

    /// Filter directive (e.g., "info", "trellis_router=debug,warn").
    pub level: String,

    /// Output format.
    pub format: LogFormat,

    /// Append to this file instead of writing to stderr.
    pub path: Option<PathBuf>,

    /// Whether to include span events (new, close).
    pub span_events: bool,

    /// Whether to include file/line info.
    pub file_line_info: bool,

    /// Whether to include thread IDs.
    pub thread_ids: bool,

    /// Whether to include target (module path).
    pub include_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            format: LogFormat::Json,
            path: None,
            span_events: false,
            file_line_info: false,
            thread_ids: false,
            include_target: true,
        }
    }
}

impl LogConfig {
    /// Creates a development configuration with human-readable output.
    #[must_use]
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            format: LogFormat::Pretty,
            span_events: true,
            file_line_info: true,
            ..Self::default()
        }
    }

    /// Creates a production configuration with JSON output.
    #[must_use]
    pub fn production() -> Self {
        Self::default()
    }

    /// Builds a configuration from deployment settings.
    ///
    /// Reads `log_level`, `log_format` and `log_path`; missing keys keep
    /// their defaults.
    ///
    /// # Errors
    ///
    /// Returns `TelemetryError::InvalidConfig` for an unknown format.
    pub fn from_settings(settings: &Settings) -> TelemetryResult<Self> {
        let mut config = Self::default();
        if let Some(level) = settings.get_str(LOG_LEVEL_KEY) {
            config.level = level.trim().to_string();
        }
        if let Some(format) = settings.get_str(LOG_FORMAT_KEY) {
            config.format = format.parse()?;
        }
        config.path = settings
            .get_str(LOG_PATH_KEY)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);
        Ok(config)
    }

    /// Sets the filter directive.
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Sets the log file.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    fn writer(&self) -> TelemetryResult<BoxMakeWriter> {
        match &self.path {
            Some(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                Ok(BoxMakeWriter::new(Mutex::new(file)))
            }
            None => Ok(BoxMakeWriter::new(std::io::stderr)),
        }
    }
}

/// Initializes the logging subsystem.
///
/// # Errors
///
/// Returns `TelemetryError::LoggingInit` if the filter is invalid or a global
/// subscriber is already installed, and `TelemetryError::Io` if the log file
/// cannot be opened.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let filter = create_env_filter(&config.level)?;
    let writer = config.writer()?;

    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let base = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(config.path.is_none())
        .with_span_events(span_events)
        .with_file(config.file_line_info)
        .with_line_number(config.file_line_info)
        .with_thread_ids(config.thread_ids)
        .with_target(config.include_target);

    let layer = match config.format {
        LogFormat::Json => base.json().with_filter(filter).boxed(),
        LogFormat::Pretty => base.pretty().with_filter(filter).boxed(),
        LogFormat::Compact => base.compact().with_filter(filter).boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}

/// Creates an env filter from a string.
///
/// # Errors
///
/// Returns error if the filter string is invalid.
pub fn create_env_filter(filter: &str) -> TelemetryResult<EnvFilter> {
    EnvFilter::try_new(filter)
        .map_err(|e| TelemetryError::LoggingInit(format!("Invalid log level: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert!(config.enabled);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, "info");
        assert!(config.path.is_none());
    }

    #[test]
    fn test_development_config() {
        let config = LogConfig::development();
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(config.span_events);
        assert!(config.file_line_info);
        assert_eq!(config.level, "debug");
    }

    #[test]
    fn test_from_settings() {
        let settings: Settings = [
            ("log_level", "warn,trellis_router=debug"),
            ("log_format", "Compact"),
            ("log_path", " /tmp/app.log "),
        ]
        .into_iter()
        .collect();

        let config = LogConfig::from_settings(&settings).unwrap();
        assert_eq!(config.level, "warn,trellis_router=debug");
        assert_eq!(config.format, LogFormat::Compact);
        assert_eq!(config.path, Some(PathBuf::from("/tmp/app.log")));
    }

    #[test]
    fn test_from_empty_settings() {
        let config = LogConfig::from_settings(&Settings::new()).unwrap();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn test_unknown_format() {
        let settings: Settings = [("log_format", "xml")].into_iter().collect();
        assert!(matches!(
            LogConfig::from_settings(&settings),
            Err(TelemetryError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_create_env_filter() {
        assert!(create_env_filter("info").is_ok());
        assert!(create_env_filter("trellis=debug,warn").is_ok());
    }

    #[test]
    fn test_log_file_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let config = LogConfig::default().with_path(&path);
        config.writer().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_disabled_logging() {
        let config = LogConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(init_logging(&config).is_ok());
    }
}
