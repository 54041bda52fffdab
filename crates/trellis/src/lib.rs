//! # Trellis
//!
//! **Config-driven application assembly.**
//!
//! A Trellis application is described by an ini deployment file: URL maps
//! mount pipelines, pipelines stack filters in front of an application, and
//! an application routes requests into a shell of models. This crate reads
//! such a file, builds every component through a [`FactoryRegistry`] and
//! returns one [`Application`] ready to serve.
//!
//! ```ini
//! [composite:main]
//! use = egg:trellis#urlmap
//! /api = api
//!
//! [pipeline:api]
//! pipeline = request_id session token main_app
//!
//! [filter:request_id]
//! use = egg:trellis#request_id
//!
//! [filter:session]
//! use = egg:trellis#session
//!
//! [filter:token]
//! use = egg:trellis#token
//!
//! [app:main_app]
//! shell = users
//!
//! [shell:users]
//! models = accounts
//!
//! [model:accounts]
//! model = accounts
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use trellis::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), DeployError> {
//!     let mut factories = FactoryRegistry::new();
//!     factories.models_mut().register::<Accounts>("accounts");
//!     trellis::serve("config:deploy/app.ini", factories).await
//! }
//! ```
//!
//! ## Request flow
//!
//! ```text
//! Request → UrlMap → ChainApp(mount) → request_id → session → token → UrlMiddleware → Shell
//!                                                                                   ↓
//! Response ←──────────────── {err_msg, err_code} on failure ←──────────────── Reply
//! ```

#![doc(html_root_url = "https://docs.rs/trellis/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod assemble;
mod deploy;
mod error;
mod registry;
mod serve;

pub use assemble::assemble;
pub use deploy::{loadapp, loadapp_with, AppUri, Deployment, SERVER_SECTION};
pub use error::DeployError;
pub use registry::{AppFactory, FactoryRegistry, FilterFactory};
pub use serve::{serve, serve_deployment};

pub use trellis_core::Application;

// Re-export the component crates
pub use trellis_config as config;
pub use trellis_core as core;
pub use trellis_middleware as middleware;
pub use trellis_router as router;
pub use trellis_server as server;
pub use trellis_session as session;
pub use trellis_telemetry as telemetry;

/// Prelude module for convenient imports.
///
/// ```rust
/// use trellis::prelude::*;
///
/// let factories = FactoryRegistry::new();
/// assert!(!factories.models().contains("accounts"));
/// ```
pub mod prelude {
    pub use crate::{loadapp, loadapp_with, serve, DeployError, Deployment, FactoryRegistry};

    pub use trellis_core::{
        handler_fn, Application, Environ, Handler, HandlerResult, Kwargs, Reply, RequestContext,
        ResponseContext, Settings, TrellisError, TrellisResult,
    };

    pub use trellis_middleware::{FnMiddleware, Middleware};

    pub use trellis_router::{Model, ModelRoutes, Route, Shell, UrlMap};

    pub use trellis_session::{
        BaseSession, Connections, SessionCache, SessionCacheConfig, SessionId, TokenGuard,
        TokenGuardConfig, TokenIssuer, TokenSource,
    };

    pub use trellis_telemetry::{init_logging, LogConfig};
}
