//! # Trellis Middleware
//!
//! The middleware chain engine of the Trellis framework.
//!
//! Components built from a deployment file register their [`Middleware`]
//! under the mount path they serve. Once assembly is complete the
//! registrations are frozen into a [`ChainRegistry`], and each request is
//! dispatched through the chain of its mount path:
//!
//! ```text
//! registered:  router  logging  auth
//! dispatched:  auth → logging → router
//! ```
//!
//! Each stage runs `process_request` then `on_success`, or `on_error` once
//! anything before it has failed. Errors and panics never escape dispatch;
//! they end up as structured JSON responses.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use trellis_config::Conf;
//! use trellis_core::{Reply, RequestContext, TrellisResult};
//! use trellis_middleware::{ChainRegistry, FnMiddleware};
//! use http::Method;
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let mut builder = ChainRegistry::builder();
//! builder.register(
//!     "/",
//!     "app",
//!     Arc::new(FnMiddleware::new("app", |ctx: &mut RequestContext| -> TrellisResult<()> {
//!         ctx.set_result(Reply::json(json!({"ok": true})));
//!         Ok(())
//!     })),
//!     Conf::new(),
//!     Conf::new(),
//!     None,
//! );
//! let registry = builder.build();
//!
//! let mut ctx = RequestContext::new(Method::GET, "/");
//! let response = registry.dispatch("/", &mut ctx).await;
//! assert_eq!(response.status.as_u16(), 200);
//! # });
//! ```

#![doc(html_root_url = "https://docs.rs/trellis-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod chain;
pub mod middleware;
pub mod stages;

pub use chain::{mount_key, ChainApp, ChainRegistry, ChainRegistryBuilder, Registration};
pub use middleware::{FnMiddleware, Middleware};
pub use stages::{AccessLogMiddleware, RequestIdMiddleware};
