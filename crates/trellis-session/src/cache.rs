//! Per-session result caching wrapped around handlers.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;
use trellis_core::{
    BoxFuture, BoxedHandler, Environ, Handler, HandlerResult, Kwargs, Reply, TrellisError,
    TrellisResult,
};
use uuid::Uuid;

use crate::connections::Connections;
use crate::guard::connection_string;
use crate::middleware::SessionId;
use crate::session::{BaseSession, DEFAULT_SESSION_TTL};

/// Configuration of a [`SessionCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCacheConfig {
    /// Fixed item key.
    pub key: Option<String>,
    /// Model setting holding the item key, used when `key` is unset.
    pub key_option: Option<String>,
    /// Fixed session name. Defaults to the request's session id, then to a
    /// UUID v5 of the item key.
    pub name: Option<String>,
    /// Model setting holding the connection string.
    pub connection_option: String,
    /// Connection slot.
    pub slot: String,
    /// Session time to live.
    pub timeout: Duration,
    /// Serve a cached result instead of calling the handler.
    pub use_cache: bool,
}

impl Default for SessionCacheConfig {
    fn default() -> Self {
        Self {
            key: None,
            key_option: None,
            name: None,
            connection_option: "connection".to_string(),
            slot: "session_cache".to_string(),
            timeout: DEFAULT_SESSION_TTL,
            use_cache: false,
        }
    }
}

impl SessionCacheConfig {
    /// Caches under a fixed item key.
    pub fn keyed(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            ..Self::default()
        }
    }

    /// Caches under the item key found in a model setting.
    pub fn key_from(option: impl Into<String>) -> Self {
        Self {
            key_option: Some(option.into()),
            ..Self::default()
        }
    }

    /// Enables answering from the cache.
    #[must_use]
    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    /// Sets the session time to live.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Pins the session name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Reads the connection string from another model setting.
    #[must_use]
    pub fn with_connection_option(mut self, option: impl Into<String>) -> Self {
        self.connection_option = option.into();
        self
    }

    fn item_key(&self, env: &Environ) -> Option<String> {
        self.key.clone().or_else(|| {
            self.key_option
                .as_deref()
                .and_then(|option| env.config().get_str(option))
                .map(ToString::to_string)
        })
    }

    fn session_name(&self, env: &Environ, key: &str) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        if let Some(id) = env.args().get::<SessionId>() {
            return id.as_str().to_string();
        }
        Uuid::new_v5(&Uuid::NAMESPACE_DNS, key.as_bytes()).to_string()
    }
}

/// A handler whose JSON result is stored in a session, and optionally
/// served from it on later calls.
#[derive(Clone)]
pub struct SessionCache {
    config: Arc<SessionCacheConfig>,
    connections: Arc<Connections>,
    inner: BoxedHandler,
}

impl std::fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCache")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SessionCache {
    /// Wraps `inner`.
    pub fn new(config: SessionCacheConfig, connections: Arc<Connections>, inner: impl Handler) -> Self {
        Self {
            config: Arc::new(config),
            connections,
            inner: Arc::new(inner),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SessionCacheConfig {
        &self.config
    }
}

fn open(config: &SessionCacheConfig, connections: &Connections, env: &Environ, key: &str) -> TrellisResult<BaseSession> {
    let connection = connection_string(None, env, &config.connection_option)?;
    let store = connections
        .connect(&config.slot, &connection)
        .map_err(|e| TrellisError::internal_with_source("session store unavailable", e))?;
    Ok(BaseSession::new(
        config.session_name(env, key),
        store,
        key,
        config.timeout,
    ))
}

impl Handler for SessionCache {
    fn call(&self, env: Environ, kwargs: Kwargs) -> BoxFuture<'static, HandlerResult> {
        let config = Arc::clone(&self.config);
        let connections = Arc::clone(&self.connections);
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            let Some(key) = config.item_key(&env) else {
                return inner.call(env, kwargs).await;
            };
            let session = open(&config, &connections, &env, &key)?;

            if config.use_cache {
                if let Some(cached) = session.get::<Value>(None).await {
                    debug!(session = %session.name(), key = %key, "session cache hit");
                    return Ok(Reply::json(cached));
                }
            }

            let reply = inner.call(env, kwargs).await?;
            if let Some(body) = reply.as_json() {
                session.set(body, None).await;
            }
            Ok(reply)
        })
    }
}
