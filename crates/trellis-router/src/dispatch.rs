//! The terminal chain stage that routes requests into a shell.

use std::sync::Arc;

use trellis_core::{
    media_type, BoxFuture, Environ, MethodInfo, RequestContext, Settings, TrellisError,
    TrellisResult,
};
use trellis_middleware::Middleware;

use crate::content::{parse_body_with_limits, MultipartLimits};
use crate::shell::Shell;

/// Routes each request into a [`Shell`] and stores the handler result.
///
/// Query arguments already in the context are merged with the decoded body,
/// body values winning. A [`MethodInfo`] and, for multipart bodies carrying
/// files, an [`UploadedFiles`](crate::UploadedFiles) are pushed into the
/// request args before the handler runs.
#[derive(Debug, Clone)]
pub struct UrlMiddleware {
    shell: Option<Arc<Shell>>,
    limits: MultipartLimits,
}

impl UrlMiddleware {
    /// Creates the stage for `shell`.
    pub fn new(shell: Arc<Shell>) -> Self {
        Self {
            shell: Some(shell),
            limits: MultipartLimits::default(),
        }
    }

    /// Creates a stage with no shell; every request is answered with 404.
    pub fn unbound() -> Self {
        Self {
            shell: None,
            limits: MultipartLimits::default(),
        }
    }

    /// Sets the multipart limits.
    #[must_use]
    pub fn with_limits(mut self, limits: MultipartLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Returns the shell, if bound.
    pub fn shell(&self) -> Option<&Arc<Shell>> {
        self.shell.as_ref()
    }
}

impl Middleware for UrlMiddleware {
    fn name(&self) -> &str {
        "url"
    }

    fn process_request<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
    ) -> BoxFuture<'a, TrellisResult<()>> {
        Box::pin(async move {
            let shell = self
                .shell
                .as_ref()
                .ok_or_else(|| TrellisError::not_found("Resource Handler not found"))?;

            if ctx.path_info().is_empty() {
                return Err(TrellisError::bad_request(format!(
                    "Bad request for {}:{}",
                    ctx.full_path(),
                    ctx.method()
                )));
            }

            let header = ctx.content_type().map(ToString::to_string);
            let parsed =
                parse_body_with_limits(header.as_deref(), ctx.declared_body(), self.limits)
                    .await?;

            let mut kwargs = ctx.kwargs().clone();
            kwargs.extend(parsed.kwargs);
            if !parsed.files.is_empty() {
                ctx.args_mut().push(parsed.files);
            }

            let info = MethodInfo {
                method: ctx.method().clone(),
                url: ctx.path_info().to_string(),
                content_type: media_type(header.as_deref()),
                file: ctx.declared_body(),
            };
            ctx.args_mut().replace(info);

            let env = Environ::from_context(ctx, Arc::new(Settings::new()));
            let reply = shell.run(env, kwargs).await?;
            ctx.set_result(reply);
            Ok(())
        })
    }
}
