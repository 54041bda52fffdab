//! Request ID middleware.
//!
//! Every request context is created with a fresh UUID v7 identifier. This
//! stage optionally adopts an `X-Request-ID` sent by a trusted caller, and
//! echoes the identifier back on the response, on success and on error, so
//! clients can quote it when reporting problems.

use crate::middleware::Middleware;
use http::header::{HeaderName, HeaderValue};
use trellis_core::{BoxFuture, RequestContext, RequestId, TrellisError, TrellisResult};
use uuid::Uuid;

/// The header name for request ID propagation.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Middleware that propagates request IDs.
///
/// # Configuration
///
/// ```ini
/// [filter:request_id]
/// use = egg:trellis#request_id
/// trust_incoming = true
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestIdMiddleware {
    /// Whether to adopt incoming `X-Request-ID` headers.
    ///
    /// Only enable this behind a proxy or for service-to-service traffic.
    trust_incoming: bool,
}

impl RequestIdMiddleware {
    /// Creates a middleware that always keeps the generated ID.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a middleware that adopts valid incoming IDs.
    #[must_use]
    pub fn trust_incoming() -> Self {
        Self {
            trust_incoming: true,
        }
    }

    fn incoming(&self, ctx: &RequestContext) -> Option<RequestId> {
        if !self.trust_incoming {
            return None;
        }
        ctx.header(REQUEST_ID_HEADER)
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
            .map(RequestId::from_uuid)
    }

    fn echo(ctx: &mut RequestContext) {
        if let Ok(value) = HeaderValue::from_str(&ctx.request_id().to_string()) {
            ctx.append_response_header(HeaderName::from_static(REQUEST_ID_HEADER), value);
        }
    }
}

impl Middleware for RequestIdMiddleware {
    fn name(&self) -> &str {
        "request_id"
    }

    fn process_request<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
    ) -> BoxFuture<'a, TrellisResult<()>> {
        Box::pin(async move {
            if let Some(id) = self.incoming(ctx) {
                ctx.set_request_id(id);
            }
            Ok(())
        })
    }

    fn on_success<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, TrellisResult<()>> {
        Box::pin(async move {
            Self::echo(ctx);
            Ok(())
        })
    }

    fn on_error<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        err: TrellisError,
    ) -> BoxFuture<'a, TrellisResult<()>> {
        Box::pin(async move {
            Self::echo(ctx);
            Err(err)
        })
    }
}
