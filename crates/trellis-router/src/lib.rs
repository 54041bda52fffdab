//! Request routing for Trellis.
//!
//! Two layers pick the code that answers a request:
//!
//! 1. A [`UrlMap`] chooses a mounted application by URL prefix, domain and
//!    version negotiation, and records the negotiated response media type.
//! 2. Inside a mounted middleware chain, the terminal [`UrlMiddleware`]
//!    decodes the body and looks the request up in its [`Shell`]'s
//!    [`RouteTable`], keyed by method and request content type.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use http::Method;
//! use serde_json::json;
//! use trellis_core::{handler_fn, Application, Environ, Kwargs, Reply, RequestContext};
//! use trellis_middleware::{ChainApp, ChainRegistry, Middleware};
//! use trellis_router::{Route, Shell, UrlMap, UrlMiddleware};
//!
//! let mut shell = Shell::builder("default");
//! shell
//!     .function(
//!         Route::new(r"/hello/(?P<name>\w+)"),
//!         "hello",
//!         handler_fn(|_env: Environ, kwargs: Kwargs| async move {
//!             Ok(Reply::json(json!({ "hello": kwargs["name"] })))
//!         }),
//!     )
//!     .unwrap();
//!
//! let router: Arc<dyn Middleware> = Arc::new(UrlMiddleware::new(Arc::new(shell.build())));
//! let mut chains = ChainRegistry::builder();
//! chains.register("/api", "router", router, Default::default(), Default::default(), None);
//! let chains = Arc::new(chains.build());
//!
//! let mut map = UrlMap::new();
//! map.mount("/api", Arc::new(ChainApp::new(chains, "/api"))).unwrap();
//!
//! let mut ctx = RequestContext::new(Method::GET, "/api/hello/ada");
//! let response = tokio_test::block_on(map.call(&mut ctx));
//! assert_eq!(response.reply.as_json(), Some(&json!({ "hello": "ada" })));
//! ```

mod content;
mod dispatch;
mod error;
mod marshal;
mod route;
mod shell;
mod urlmap;

pub use content::{
    parse_body, parse_body_with_limits, BodyClass, MultipartLimits, ParsedBody, UploadedFile,
    UploadedFiles, APPLICATION_JSON, DEFAULT_ROUTE_CONTENT_TYPES, FORM_URLENCODED,
    MULTIPART_FORM_DATA, TEXT_PLAIN,
};
pub use dispatch::UrlMiddleware;
pub use error::RouterError;
pub use marshal::{apply_content_type, guess_mime, into_http_response, DEFAULT_RESPONSE_TYPE};
pub use route::{anchor, HandlerRef, Route, RouteKey, RouteMatch, RouteTable};
pub use shell::{Model, ModelRegistry, ModelRoutes, Shell, ShellBuilder};
pub use urlmap::{
    MountChoice, MountPath, Negotiation, RequestFacts, UrlMap, ATOM_XML, SUPPORTED_CONTENT_TYPES,
};
