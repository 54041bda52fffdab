//! Server configuration types.
//!
//! Settings can be given through the builder or read from a deployment
//! file's server section:
//!
//! ```ini
//! [server:main]
//! host = 0.0.0.0
//! port = 8080
//! request_timeout = 30
//! max_body_size = 10485760
//! ```
//!
//! # Example
//!
//! ```rust
//! use trellis_server::ServerConfig;
//! use std::time::Duration;
//!
//! let config = ServerConfig::builder()
//!     .http_addr("0.0.0.0:8080")
//!     .shutdown_timeout(Duration::from_secs(30))
//!     .build();
//!
//! assert_eq!(config.http_addr(), "0.0.0.0:8080");
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use trellis_core::Settings;

use crate::error::ServerError;

/// Default HTTP bind address.
pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default cap on request body size: 10 MiB.
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Server configuration.
///
/// Use [`ServerConfig::builder()`] to construct instances.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP server bind address (e.g., "0.0.0.0:8080")
    http_addr: String,

    /// How long to wait for in-flight connections on shutdown
    shutdown_timeout: Duration,

    /// Limit on body collection plus dispatch of one request
    request_timeout: Duration,

    /// Largest accepted request body in bytes
    max_body_size: usize,

    /// Whether HTTP/1.1 keep-alive is enabled
    keep_alive: bool,
}

impl ServerConfig {
    /// Creates a new server configuration builder.
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Reads a configuration from deployment settings.
    ///
    /// Recognized keys are `host`, `port`, `shutdown_timeout`,
    /// `request_timeout` (both in seconds), `max_body_size` and
    /// `keep_alive`. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] when a numeric or boolean key does not
    /// parse.
    pub fn from_settings(settings: &Settings) -> Result<Self, ServerError> {
        let mut builder = ServerConfigBuilder::new();

        let host = settings.get_str("host").map(str::trim);
        let port = settings.get_str("port").map(str::trim);
        if host.is_some() || port.is_some() {
            let (default_host, default_port) = DEFAULT_HTTP_ADDR
                .rsplit_once(':')
                .unwrap_or(("0.0.0.0", "8080"));
            let port: u16 = parse_key("port", port.unwrap_or(default_port))?;
            builder = builder.http_addr(format!("{}:{port}", host.unwrap_or(default_host)));
        }
        if let Some(secs) = settings.get_str("shutdown_timeout") {
            builder = builder.shutdown_timeout(Duration::from_secs(parse_key("shutdown_timeout", secs)?));
        }
        if let Some(secs) = settings.get_str("request_timeout") {
            builder = builder.request_timeout(Duration::from_secs(parse_key("request_timeout", secs)?));
        }
        if let Some(size) = settings.get_str("max_body_size") {
            builder = builder.max_body_size(parse_key("max_body_size", size)?);
        }
        if let Some(flag) = settings.get_str("keep_alive") {
            builder = builder.keep_alive(parse_flag("keep_alive", flag)?);
        }
        Ok(builder.build())
    }

    /// Returns the HTTP bind address.
    #[must_use]
    pub fn http_addr(&self) -> &str {
        &self.http_addr
    }

    /// Parses and returns the HTTP address as a `SocketAddr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.http_addr.parse()
    }

    /// Returns the graceful shutdown timeout.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Returns the request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Returns the request body size limit.
    #[must_use]
    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    /// Returns whether keep-alive is enabled.
    #[must_use]
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

fn parse_key<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ServerError> {
    raw.trim().parse().map_err(|_| ServerError::Config {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, ServerError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(ServerError::Config {
            key: key.to_string(),
            value: raw.to_string(),
        }),
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug, Clone)]
pub struct ServerConfigBuilder {
    http_addr: String,
    shutdown_timeout: Duration,
    request_timeout: Duration,
    max_body_size: usize,
    keep_alive: bool,
}

impl ServerConfigBuilder {
    /// Creates a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            http_addr: DEFAULT_HTTP_ADDR.to_string(),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            keep_alive: true,
        }
    }

    /// Sets the HTTP bind address.
    #[must_use]
    pub fn http_addr(mut self, addr: impl Into<String>) -> Self {
        self.http_addr = addr.into();
        self
    }

    /// Sets the graceful shutdown timeout.
    ///
    /// This is the maximum time the server waits for in-flight connections
    /// once shutdown is triggered.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets the request timeout.
    ///
    /// Applies separately to body collection and to dispatch.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the request body size limit.
    #[must_use]
    pub fn max_body_size(mut self, bytes: usize) -> Self {
        self.max_body_size = bytes;
        self
    }

    /// Enables or disables keep-alive.
    #[must_use]
    pub fn keep_alive(mut self, enabled: bool) -> Self {
        self.keep_alive = enabled;
        self
    }

    /// Builds the [`ServerConfig`].
    #[must_use]
    pub fn build(self) -> ServerConfig {
        ServerConfig {
            http_addr: self.http_addr,
            shutdown_timeout: self.shutdown_timeout,
            request_timeout: self.request_timeout,
            max_body_size: self.max_body_size,
            keep_alive: self.keep_alive,
        }
    }
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
