//! # Trellis Core
//!
//! Core types and traits for the Trellis application framework.
//!
//! This crate provides the foundational types used throughout Trellis:
//!
//! - [`RequestContext`] - Per-request state flowing through a middleware chain
//! - [`Args`] - Typed ambient values shared between chain stages
//! - [`TrellisError`] - Error taxonomy with HTTP status and `err_code`
//! - [`Handler`] - Fixed route handler interface over [`Environ`] and [`Kwargs`]
//! - [`Application`] - Anything that turns a request into a [`ResponseContext`]
//! - [`Settings`] - Resolved model configuration

#![doc(html_root_url = "https://docs.rs/trellis-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod context;
mod error;
mod handler;
mod reply;
mod settings;

pub use context::{Args, RequestContext, RequestId};
pub use error::{
    ErrorBody, TrellisError, TrellisResult, AUTHENTICATION_FAILED_CODE, BAD_REQUEST_CODE,
    EXPIRED_TOKEN_CODE, INVALID_TOKEN_CODE, NOT_FOUND_CODE,
};
pub use handler::{
    handler_fn, media_type, Application, BoxFuture, BoxedHandler, Environ, FnHandler, Handler,
    HandlerResult, Kwargs, MethodInfo, DEFAULT_CONTENT_TYPE,
};
pub use reply::{Reply, ResponseContext, OCTET_STREAM};
pub use settings::{SettingValue, Settings, VersionSet, DEFAULT_VERSION};
