//! Mount-keyed middleware chains.
//!
//! During assembly every component registers its middleware under the mount
//! path it serves. Registrations only accumulate; once assembly is done the
//! builder is frozen into a [`ChainRegistry`] that is shared read-only by all
//! requests.
//!
//! ## Ordering
//!
//! A chain runs its registrations in **reverse** registration order. The
//! assembler registers the terminal application first and the filters of a
//! pipeline after it, innermost first, so the last registration is the
//! first to see a request.
//!
//! ## Failure
//!
//! An error returned by a stage, or a panic inside it, becomes a value: the
//! failing stage's [`Middleware::on_error`] sees it first, then every later
//! stage receives it through `on_error` instead of `process_request`. When
//! the chain finishes with an error, it is rendered as the structured
//! `{err_msg, err_code}` response.

use crate::middleware::Middleware;
use futures_util::FutureExt;
use http::HeaderMap;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};
use trellis_config::Conf;
use trellis_core::{
    Application, BoxFuture, RequestContext, ResponseContext, TrellisError, TrellisResult,
};

/// Normalizes a mount path: no trailing slash, and `/` for the root.
///
/// ```
/// use trellis_middleware::mount_key;
///
/// assert_eq!(mount_key(""), "/");
/// assert_eq!(mount_key("/"), "/");
/// assert_eq!(mount_key("/api/"), "/api");
/// ```
pub fn mount_key(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// One middleware registered under a mount path.
#[derive(Clone)]
pub struct Registration {
    /// Name of the configuration node that produced the middleware.
    pub name: String,
    /// The middleware.
    pub middleware: Arc<dyn Middleware>,
    /// Process-wide configuration seen by the node.
    pub global_conf: Conf,
    /// Section configuration of the node.
    pub local_conf: Conf,
    /// Shell the chain ends in, if known.
    pub shell: Option<String>,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("middleware", &self.middleware.name())
            .field("shell", &self.shell)
            .finish_non_exhaustive()
    }
}

/// Accumulates registrations during assembly.
#[derive(Debug, Default)]
pub struct ChainRegistryBuilder {
    chains: HashMap<String, Vec<Registration>>,
}

impl ChainRegistryBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a middleware to the chain of `mount`.
    pub fn register(
        &mut self,
        mount: &str,
        name: impl Into<String>,
        middleware: Arc<dyn Middleware>,
        global_conf: Conf,
        local_conf: Conf,
        shell: Option<String>,
    ) -> &mut Self {
        let key = mount_key(mount);
        let registration = Registration {
            name: name.into(),
            middleware,
            global_conf,
            local_conf,
            shell,
        };
        debug!(
            mount = %key,
            name = %registration.name,
            middleware = registration.middleware.name(),
            "registered middleware"
        );
        self.chains.entry(key).or_default().push(registration);
        self
    }

    /// Returns the registrations accumulated for `mount` so far.
    pub fn registrations(&self, mount: &str) -> &[Registration] {
        self.chains
            .get(&mount_key(mount))
            .map_or(&[], Vec::as_slice)
    }

    /// Freezes the registrations.
    #[must_use]
    pub fn build(self) -> ChainRegistry {
        ChainRegistry {
            chains: self
                .chains
                .into_iter()
                .map(|(mount, regs)| (mount, Arc::from(regs)))
                .collect(),
        }
    }
}

/// Immutable middleware chains keyed by mount path.
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    chains: HashMap<String, Arc<[Registration]>>,
}

impl ChainRegistry {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> ChainRegistryBuilder {
        ChainRegistryBuilder::new()
    }

    /// Returns the chain of `mount`, in registration order.
    pub fn chain(&self, mount: &str) -> Option<&[Registration]> {
        self.chains.get(&mount_key(mount)).map(AsRef::as_ref)
    }

    /// Iterates over the registered mount paths.
    pub fn mounts(&self) -> impl Iterator<Item = &str> {
        self.chains.keys().map(String::as_str)
    }

    /// Runs `ctx` through the chain of `mount`.
    pub async fn dispatch(&self, mount: &str, ctx: &mut RequestContext) -> ResponseContext {
        let Some(chain) = self.chain(mount) else {
            let err = TrellisError::not_found(format!("nothing mounted at {}", mount_key(mount)));
            return ResponseContext::from_error(&err, ctx.take_response_headers());
        };

        let mut state: TrellisResult<()> = Ok(());
        for registration in chain.iter().rev() {
            state = run_stage(registration, ctx, state).await;
        }

        let headers: HeaderMap = ctx.take_response_headers();
        match state {
            Ok(()) => ResponseContext::from_reply(ctx.take_result(), headers),
            Err(err) => {
                if err.is_recognized() {
                    debug!(request_id = %ctx.request_id(), error = %err, "request failed");
                } else {
                    error!(
                        request_id = %ctx.request_id(),
                        error = %err,
                        source = ?std::error::Error::source(&err),
                        "unhandled error in middleware chain"
                    );
                }
                ResponseContext::from_error(&err, headers)
            }
        }
    }
}

async fn run_stage(
    registration: &Registration,
    ctx: &mut RequestContext,
    state: TrellisResult<()>,
) -> TrellisResult<()> {
    let middleware = registration.middleware.as_ref();
    let stage = middleware.name();

    let err = match state {
        Err(err) => err,
        Ok(()) => {
            let outcome = match guarded(stage, middleware.process_request(ctx)).await {
                Ok(()) => guarded(stage, middleware.on_success(ctx)).await,
                Err(err) => Err(err),
            };
            match outcome {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(stage, request_id = %ctx.request_id(), error = %err, "middleware stage failed");
                    err
                }
            }
        }
    };

    guarded(stage, middleware.on_error(ctx, err)).await
}

/// Turns a panic inside a stage hook into an internal error.
async fn guarded(
    stage: &str,
    hook: BoxFuture<'_, TrellisResult<()>>,
) -> TrellisResult<()> {
    match AssertUnwindSafe(hook).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(stage, panic = %message, "middleware stage panicked");
            Err(TrellisError::internal(format!("stage {stage} panicked: {message}")))
        }
    }
}

/// An [`Application`] that dispatches through one mount path's chain.
#[derive(Debug, Clone)]
pub struct ChainApp {
    registry: Arc<ChainRegistry>,
    mount: String,
}

impl ChainApp {
    /// Creates an application for `mount`.
    pub fn new(registry: Arc<ChainRegistry>, mount: &str) -> Self {
        Self {
            registry,
            mount: mount_key(mount),
        }
    }

    /// The normalized mount path.
    pub fn mount(&self) -> &str {
        &self.mount
    }

    /// The shared registry.
    pub fn registry(&self) -> &Arc<ChainRegistry> {
        &self.registry
    }
}

impl Application for ChainApp {
    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, ResponseContext> {
        Box::pin(self.registry.dispatch(&self.mount, ctx))
    }
}
