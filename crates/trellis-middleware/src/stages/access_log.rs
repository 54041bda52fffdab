//! Access logging.
//!
//! Emits one structured `tracing` event when a request enters the chain and
//! one when it leaves this stage, successfully or not. Requests slower than
//! the configured threshold are logged at `WARN`.

use crate::middleware::Middleware;
use std::time::Duration;
use tracing::{info, warn};
use trellis_core::{BoxFuture, RequestContext, TrellisError, TrellisResult};

/// Structured access log stage.
///
/// # Configuration
///
/// ```ini
/// [filter:access_log]
/// use = egg:trellis#access_log
/// slow_ms = 250
/// ```
#[derive(Debug, Clone, Default)]
pub struct AccessLogMiddleware {
    slow_threshold: Option<Duration>,
}

impl AccessLogMiddleware {
    /// Creates an access logger without a slow-request threshold.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Logs requests slower than `threshold` at `WARN`.
    #[must_use]
    pub fn with_slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = Some(threshold);
        self
    }

    /// Returns the slow-request threshold.
    pub fn slow_threshold(&self) -> Option<Duration> {
        self.slow_threshold
    }

    fn is_slow(&self, elapsed: Duration) -> bool {
        self.slow_threshold.is_some_and(|t| elapsed > t)
    }
}

impl Middleware for AccessLogMiddleware {
    fn name(&self) -> &str {
        "access_log"
    }

    fn process_request<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
    ) -> BoxFuture<'a, TrellisResult<()>> {
        Box::pin(async move {
            info!(
                request_id = %ctx.request_id(),
                method = %ctx.method(),
                script_name = ctx.script_name(),
                path = ctx.path_info(),
                content_type = ctx.content_type().unwrap_or(""),
                content_length = ctx.content_length(),
                "request received"
            );
            Ok(())
        })
    }

    fn on_success<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, TrellisResult<()>> {
        Box::pin(async move {
            let elapsed = ctx.elapsed();
            let status = ctx.result().map_or(200, |r| r.status().as_u16());
            if self.is_slow(elapsed) {
                warn!(
                    request_id = %ctx.request_id(),
                    path = ctx.path_info(),
                    status,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "slow request"
                );
            } else {
                info!(
                    request_id = %ctx.request_id(),
                    path = ctx.path_info(),
                    status,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "request completed"
                );
            }
            Ok(())
        })
    }

    fn on_error<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        err: TrellisError,
    ) -> BoxFuture<'a, TrellisResult<()>> {
        Box::pin(async move {
            warn!(
                request_id = %ctx.request_id(),
                path = ctx.path_info(),
                status = err.status_code().as_u16(),
                err_code = err.error_code(),
                elapsed_ms = ctx.elapsed().as_millis() as u64,
                "request failed"
            );
            Err(err)
        })
    }
}
