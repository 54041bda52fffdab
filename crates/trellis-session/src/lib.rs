//! # Trellis Session
//!
//! Sessions and bearer tokens for Trellis applications.
//!
//! - [`SessionStore`] is the hash store sessions live in; [`MemoryStore`]
//!   is the in-process backend and [`Connections`] shares stores between
//!   handlers by slot name.
//! - [`BaseSession`] reads and writes JSON items of one named session.
//! - [`SessionMiddleware`] gives every request a cookie-backed
//!   [`SessionId`]; [`TokenMiddleware`] captures headers and keyword
//!   arguments as [`TokenMaterial`].
//! - [`TokenIssuer`] issues bearer tokens, and [`TokenGuard`] admits only
//!   callers presenting the token last issued for their identity.
//! - [`SessionCache`] stores a handler's JSON result in the caller's
//!   session.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use trellis_session::{Connections, TokenIssuer};
//!
//! # tokio_test::block_on(async {
//! let connections = Connections::new();
//! let store = connections.connect("token_session", "memory://local:0").unwrap();
//! let issuer = TokenIssuer::new(store, "login:", Duration::from_secs(3600));
//! let token = issuer.issue(&["ada"], &["read"]).await.unwrap();
//! assert_eq!(token.split(':').count(), 3);
//! # });
//! ```

#![doc(html_root_url = "https://docs.rs/trellis-session/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod cache;
mod connections;
mod error;
mod guard;
mod middleware;
mod session;
mod store;
mod token;

pub use cache::{SessionCache, SessionCacheConfig};
pub use connections::{parse_connection, Connections, StoreConstructor, MEMORY_SCHEME};
pub use error::{StoreError, StoreResult};
pub use guard::{TokenGuard, TokenGuardConfig, TokenSource};
pub use middleware::{
    cookie_value, header_key, SessionId, SessionMiddleware, TokenMaterial, TokenMiddleware,
    SESSION_COOKIE,
};
pub use session::{BaseSession, DEFAULT_SESSION_TTL};
pub use store::{MemoryStore, SessionStore};
pub use token::{
    diff_token, diff_token_at, generate_token, generate_token_at, identity_key, parse_token,
    TokenIssuer, TokenScope, TOKEN_GRACE, TOKEN_ITEM,
};
