//! Handler and application interfaces.
//!
//! Every route handler has the same shape: it receives an [`Environ`] (the
//! per-call view of the request) and the request [`Kwargs`], and resolves to
//! a [`HandlerResult`]. Cross-cutting wrappers such as token guards are
//! themselves handlers that decorate an inner one at registration time.

use crate::context::{Args, RequestContext};
use crate::error::TrellisError;
use crate::reply::{Reply, ResponseContext};
use crate::settings::Settings;
use bytes::Bytes;
use http::Method;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Keyword arguments gathered from the query string and request body.
pub type Kwargs = serde_json::Map<String, serde_json::Value>;

/// Result of a handler invocation.
pub type HandlerResult = Result<Reply, TrellisError>;

/// Content type assumed when a request does not declare one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Returns the bare, lowercased media type of a `Content-Type` header value.
///
/// Parameters are dropped; a missing or empty header yields
/// [`DEFAULT_CONTENT_TYPE`].
#[must_use]
pub fn media_type(header: Option<&str>) -> String {
    header
        .and_then(|h| h.split(';').next())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map_or_else(|| DEFAULT_CONTENT_TYPE.to_string(), str::to_ascii_lowercase)
}

/// Method, URL and raw body of the request being routed.
///
/// The router pushes this into [`Args`] before calling the handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    /// HTTP method.
    pub method: Method,
    /// Path below the mount point.
    pub url: String,
    /// Bare media type of the request body.
    pub content_type: String,
    /// Raw request body.
    pub file: Bytes,
}

/// The explicit per-call environment handed to a handler.
///
/// It is an owned snapshot: handlers may keep it across await points and
/// nothing they do to it leaks back into the request context.
#[derive(Debug, Clone)]
pub struct Environ {
    info: MethodInfo,
    args: Args,
    config: Arc<Settings>,
}

impl Environ {
    /// Creates an environment.
    #[must_use]
    pub fn new(info: MethodInfo, args: Args, config: Arc<Settings>) -> Self {
        Self { info, args, config }
    }

    /// Creates an environment snapshot from a request context.
    #[must_use]
    pub fn from_context(ctx: &RequestContext, config: Arc<Settings>) -> Self {
        let info = ctx.args().get::<MethodInfo>().cloned().unwrap_or_else(|| MethodInfo {
            method: ctx.method().clone(),
            url: ctx.path_info().to_string(),
            content_type: media_type(ctx.content_type()),
            file: ctx.declared_body(),
        });
        Self::new(info, ctx.args().clone(), config)
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.info.method
    }

    /// Returns the routed path.
    pub fn url(&self) -> &str {
        &self.info.url
    }

    /// Returns the bare media type of the request body.
    pub fn content_type(&self) -> &str {
        &self.info.content_type
    }

    /// Returns the raw request body.
    pub fn file(&self) -> &Bytes {
        &self.info.file
    }

    /// Returns the ambient argument map.
    pub fn args(&self) -> &Args {
        &self.args
    }

    /// Returns the configuration of the model that owns the handler.
    pub fn config(&self) -> &Settings {
        &self.config
    }

    /// Returns a shared handle to the model configuration.
    pub fn config_arc(&self) -> Arc<Settings> {
        Arc::clone(&self.config)
    }

    /// Replaces the model configuration.
    #[must_use]
    pub fn with_config(mut self, config: Arc<Settings>) -> Self {
        self.config = config;
        self
    }
}

/// A route handler.
///
/// # Example
///
/// ```
/// use trellis_core::{handler_fn, Environ, Handler, Kwargs, Reply};
/// use serde_json::json;
///
/// let hello = handler_fn(|env: Environ, kwargs: Kwargs| async move {
///     let name = kwargs.get("name").cloned().unwrap_or(json!("world"));
///     Ok(Reply::json(json!({"hello": name, "url": env.url()})))
/// });
/// # let _: &dyn Handler = &hello;
/// ```
pub trait Handler: Send + Sync + 'static {
    /// Invokes the handler.
    fn call(&self, env: Environ, kwargs: Kwargs) -> BoxFuture<'static, HandlerResult>;
}

/// Shared, type-erased handler.
pub type BoxedHandler = Arc<dyn Handler>;

impl<H: Handler + ?Sized> Handler for Arc<H> {
    fn call(&self, env: Environ, kwargs: Kwargs) -> BoxFuture<'static, HandlerResult> {
        (**self).call(env, kwargs)
    }
}

/// Adapts an async function to [`Handler`].
#[derive(Clone)]
pub struct FnHandler<F> {
    func: F,
}

impl<F> std::fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Environ, Kwargs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, env: Environ, kwargs: Kwargs) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self.func)(env, kwargs))
    }
}

/// Wraps an async function as a handler.
pub const fn handler_fn<F, Fut>(func: F) -> FnHandler<F>
where
    F: Fn(Environ, Kwargs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    FnHandler { func }
}

/// Something that turns a request context into a response.
///
/// Mounted middleware chains and URL maps both implement this, so a loaded
/// configuration always yields one `Arc<dyn Application>`.
pub trait Application: Send + Sync + 'static {
    /// Processes one request.
    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, ResponseContext>;
}
