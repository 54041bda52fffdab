//! Bearer token checks wrapped around handlers.
//!
//! A [`TokenGuard`] decorates a handler at registration time. Before the
//! handler runs, the guard:
//!
//! 1. requires every configured key field in the keyword arguments,
//! 2. concatenates the configured header or keyword fields into the
//!    presented token,
//! 3. loads the token persisted for the identity `prefix + key values`,
//! 4. rejects a token that differs from the persisted one, or has expired.
//!
//! The store comes from the owning model's configuration: the option named
//! by `connection_option` holds a `scheme://host:port` connection string.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;
use trellis_core::{
    BoxFuture, BoxedHandler, Environ, Handler, HandlerResult, Kwargs, TrellisError, TrellisResult,
};

use crate::connections::Connections;
use crate::middleware::TokenMaterial;
use crate::session::BaseSession;
use crate::token::{diff_token, identity_key, TOKEN_ITEM};

/// Where the presented token is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    /// Concatenation of these request headers.
    Headers(Vec<String>),
    /// Concatenation of these keyword arguments.
    Kwargs(Vec<String>),
}

/// Configuration of a [`TokenGuard`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGuardConfig {
    /// Keyword arguments that identify the caller.
    pub keys: Vec<String>,
    /// Prefix of the identity key.
    pub key_prefix: String,
    /// Where the presented token comes from.
    pub source: TokenSource,
    /// Fixed connection string; takes precedence over `connection_option`.
    pub connection: Option<String>,
    /// Model setting holding the connection string.
    pub connection_option: String,
    /// Connection slot shared by all guards using the same store.
    pub slot: String,
    /// How long a token stays valid after issue.
    pub expired_time: Duration,
}

impl TokenGuardConfig {
    /// Guards on `keys`, reading the token from `source`.
    pub fn new<S: Into<String>>(keys: impl IntoIterator<Item = S>, source: TokenSource) -> Self {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            key_prefix: String::new(),
            source,
            connection: None,
            connection_option: "connection".to_string(),
            slot: "token_session".to_string(),
            expired_time: Duration::from_secs(3600),
        }
    }

    /// Sets the identity key prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Uses a fixed connection string.
    #[must_use]
    pub fn with_connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = Some(connection.into());
        self
    }

    /// Reads the connection string from another model setting.
    #[must_use]
    pub fn with_connection_option(mut self, option: impl Into<String>) -> Self {
        self.connection_option = option.into();
        self
    }

    /// Sets the connection slot.
    #[must_use]
    pub fn with_slot(mut self, slot: impl Into<String>) -> Self {
        self.slot = slot.into();
        self
    }

    /// Sets the token lifetime.
    #[must_use]
    pub fn with_expired_time(mut self, expired_time: Duration) -> Self {
        self.expired_time = expired_time;
        self
    }
}

/// A handler that runs only for callers presenting their current token.
#[derive(Clone)]
pub struct TokenGuard {
    config: Arc<TokenGuardConfig>,
    connections: Arc<Connections>,
    inner: BoxedHandler,
}

impl std::fmt::Debug for TokenGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGuard")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TokenGuard {
    /// Wraps `inner`.
    pub fn new(config: TokenGuardConfig, connections: Arc<Connections>, inner: impl Handler) -> Self {
        Self {
            config: Arc::new(config),
            connections,
            inner: Arc::new(inner),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &TokenGuardConfig {
        &self.config
    }
}

/// Renders a scalar keyword argument as text.
pub(crate) fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Resolves the store connection string from a fixed value or a model option.
pub(crate) fn connection_string(
    fixed: Option<&str>,
    env: &Environ,
    option: &str,
) -> TrellisResult<String> {
    fixed
        .or_else(|| env.config().get_str(option))
        .map(ToString::to_string)
        .ok_or_else(|| {
            TrellisError::internal(format!("no session store configured under '{option}'"))
        })
}

fn presented_token(source: &TokenSource, material: &TokenMaterial, kwargs: &Kwargs) -> String {
    match source {
        TokenSource::Headers(names) => names
            .iter()
            .filter_map(|name| material.header(name))
            .collect(),
        TokenSource::Kwargs(names) => names
            .iter()
            .filter_map(|name| material.kwargs.get(name).or_else(|| kwargs.get(name)))
            .filter_map(value_text)
            .collect(),
    }
}

async fn check(
    config: &TokenGuardConfig,
    connections: &Connections,
    env: &Environ,
    kwargs: &Kwargs,
) -> TrellisResult<()> {
    let mut values = Vec::with_capacity(config.keys.len());
    for key in &config.keys {
        let value = kwargs
            .get(key)
            .and_then(value_text)
            .ok_or_else(|| TrellisError::authentication_failed("Authentication failed"))?;
        values.push(value);
    }

    let material = env.args().get::<TokenMaterial>().cloned().unwrap_or_default();
    let presented = presented_token(&config.source, &material, kwargs);
    if presented.is_empty() {
        return Err(TrellisError::authentication_failed("Authentication failed"));
    }

    let connection = connection_string(
        config.connection.as_deref(),
        env,
        &config.connection_option,
    )?;
    let store = connections
        .connect(&config.slot, &connection)
        .map_err(|e| TrellisError::internal_with_source("token store unavailable", e))?;

    let refs: Vec<&str> = values.iter().map(String::as_str).collect();
    let identity = identity_key(&config.key_prefix, &refs);
    let session = BaseSession::new(identity.as_str(), store, TOKEN_ITEM, config.expired_time);
    let stored: Option<String> = session.get(None).await;

    diff_token(&presented, stored.as_deref(), config.expired_time).map_err(|e| {
        debug!(identity = %identity, error = %e, "token rejected");
        e
    })?;
    Ok(())
}

impl Handler for TokenGuard {
    fn call(&self, env: Environ, kwargs: Kwargs) -> BoxFuture<'static, HandlerResult> {
        let config = Arc::clone(&self.config);
        let connections = Arc::clone(&self.connections);
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            check(&config, &connections, &env, &kwargs).await?;
            inner.call(env, kwargs).await
        })
    }
}
