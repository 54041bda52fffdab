//! The [`Middleware`] trait.
//!
//! A middleware stage sees a request in one of two states. If everything
//! before it succeeded, the chain calls [`Middleware::process_request`] and
//! then [`Middleware::on_success`]. If an earlier stage failed, the chain
//! calls [`Middleware::on_error`] with that failure instead, and the stage
//! either passes the error on or recovers by returning `Ok(())`.
//!
//! # Example
//!
//! ```
//! use trellis_core::{BoxFuture, RequestContext, TrellisError, TrellisResult};
//! use trellis_middleware::Middleware;
//!
//! struct RequireJson;
//!
//! impl Middleware for RequireJson {
//!     fn name(&self) -> &str {
//!         "require_json"
//!     }
//!
//!     fn process_request<'a>(
//!         &'a self,
//!         ctx: &'a mut RequestContext,
//!     ) -> BoxFuture<'a, TrellisResult<()>> {
//!         Box::pin(async move {
//!             match ctx.content_type() {
//!                 Some(ct) if ct.starts_with("application/json") => Ok(()),
//!                 _ => Err(TrellisError::bad_request("expected a JSON body")),
//!             }
//!         })
//!     }
//! }
//! ```

use trellis_core::{BoxFuture, RequestContext, TrellisError, TrellisResult};

/// A stage of a middleware chain.
pub trait Middleware: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Handles a request that has not failed so far.
    fn process_request<'a>(&'a self, ctx: &'a mut RequestContext)
        -> BoxFuture<'a, TrellisResult<()>>;

    /// Runs after [`Middleware::process_request`] succeeded.
    fn on_success<'a>(&'a self, _ctx: &'a mut RequestContext) -> BoxFuture<'a, TrellisResult<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Handles a request that failed earlier in the chain, or in this stage.
    ///
    /// Returning `Ok(())` recovers the request; the default passes the error on.
    fn on_error<'a>(
        &'a self,
        _ctx: &'a mut RequestContext,
        err: TrellisError,
    ) -> BoxFuture<'a, TrellisResult<()>> {
        Box::pin(async move { Err(err) })
    }
}

/// A middleware built from a synchronous closure run as `process_request`.
///
/// # Example
///
/// ```
/// use trellis_core::{RequestContext, TrellisResult};
/// use trellis_middleware::FnMiddleware;
/// use http::header::{HeaderName, HeaderValue};
///
/// let tag = FnMiddleware::new("tag", |ctx: &mut RequestContext| -> TrellisResult<()> {
///     ctx.append_response_header(
///         HeaderName::from_static("x-served-by"),
///         HeaderValue::from_static("trellis"),
///     );
///     Ok(())
/// });
/// ```
pub struct FnMiddleware<F> {
    name: String,
    func: F,
}

impl<F> FnMiddleware<F> {
    /// Creates a function-based middleware.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> std::fmt::Debug for FnMiddleware<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnMiddleware").field("name", &self.name).finish()
    }
}

impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&mut RequestContext) -> TrellisResult<()> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process_request<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
    ) -> BoxFuture<'a, TrellisResult<()>> {
        Box::pin(async move { (self.func)(ctx) })
    }
}
