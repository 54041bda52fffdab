//! # Trellis Server
//!
//! The HTTP edge of a Trellis deployment.
//!
//! - [`Server`] accepts HTTP/1.1 connections via Hyper and hands each request
//!   to an [`Application`](trellis_core::Application) as a
//!   [`RequestContext`](trellis_core::RequestContext).
//! - [`AppHandle`] holds the running application and swaps it atomically;
//!   [`watch_and_reload`] rebuilds it when a deployment file changes.
//! - [`ShutdownSignal`] and [`ConnectionTracker`] drive graceful shutdown.
//!
//! ## Example
//!
//! ```rust
//! use trellis_server::ServerConfig;
//!
//! let config = ServerConfig::builder()
//!     .http_addr("127.0.0.1:3000")
//!     .build();
//! assert_eq!(config.socket_addr().unwrap().port(), 3000);
//! ```

#![doc(html_root_url = "https://docs.rs/trellis-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod reload;
mod server;
mod shutdown;

pub use config::{
    ServerConfig, ServerConfigBuilder, DEFAULT_HTTP_ADDR, DEFAULT_MAX_BODY_SIZE,
    DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_SHUTDOWN_TIMEOUT_SECS,
};
pub use error::ServerError;
pub use reload::{watch_and_reload, AppHandle};
pub use server::{HttpResponse, ResponseBody, Server};
pub use shutdown::{ConnectionTracker, OpenConnection, ShutdownSignal};
