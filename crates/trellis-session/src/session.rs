//! Named sessions on top of a [`SessionStore`].
//!
//! A session is one store hash. Each item is kept under the field
//! `base64(name + item)` as JSON, and every write refreshes the hash's time
//! to live.
//!
//! `get`, `set` and `clear` never fail: backend errors are logged and read
//! as "no value". Callers that must fail closed use the `try_` variants.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::StoreResult;
use crate::store::SessionStore;

/// Default time to live of a session hash: one day.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(86_400);

/// A named session.
#[derive(Clone)]
pub struct BaseSession {
    name: String,
    store: Arc<dyn SessionStore>,
    default_key: String,
    expired_time: Duration,
}

impl fmt::Debug for BaseSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseSession")
            .field("name", &self.name)
            .field("default_key", &self.default_key)
            .field("expired_time", &self.expired_time)
            .finish_non_exhaustive()
    }
}

impl BaseSession {
    /// Creates a session. Items default to `default_key` when none is given.
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn SessionStore>,
        default_key: impl Into<String>,
        expired_time: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            default_key: default_key.into(),
            expired_time,
        }
    }

    /// Returns the session name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the time to live applied on write.
    pub fn expired_time(&self) -> Duration {
        self.expired_time
    }

    fn field(&self, item: Option<&str>) -> String {
        let item = item.unwrap_or(&self.default_key);
        STANDARD.encode(format!("{}{item}", self.name))
    }

    /// Reads an item, or `None` if it is absent, expired or unreadable.
    pub async fn get<T: DeserializeOwned>(&self, item: Option<&str>) -> Option<T> {
        match self.try_get(item).await {
            Ok(value) => value,
            Err(e) => {
                debug!(session = %self.name, error = %e, "session read failed");
                None
            }
        }
    }

    /// Stores an item and refreshes the session's time to live.
    pub async fn set<T: Serialize>(&self, value: &T, item: Option<&str>) {
        if let Err(e) = self.try_set(value, item).await {
            debug!(session = %self.name, error = %e, "session write failed");
        }
    }

    /// Deletes an item.
    pub async fn clear(&self, item: Option<&str>) {
        if let Err(e) = self.try_clear(item).await {
            debug!(session = %self.name, error = %e, "session clear failed");
        }
    }

    /// Reads an item, reporting backend and decoding errors.
    pub async fn try_get<T: DeserializeOwned>(&self, item: Option<&str>) -> StoreResult<Option<T>> {
        let field = self.field(item);
        match self.store.hget(&self.name, &field).await? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    /// Stores an item, reporting backend and encoding errors.
    pub async fn try_set<T: Serialize>(&self, value: &T, item: Option<&str>) -> StoreResult<()> {
        let field = self.field(item);
        let raw = Bytes::from(serde_json::to_vec(value)?);
        self.store.hset(&self.name, &field, raw).await?;
        self.store.expire(&self.name, self.expired_time).await?;
        Ok(())
    }

    /// Deletes an item, reporting backend errors. Returns whether it existed.
    pub async fn try_clear(&self, item: Option<&str>) -> StoreResult<bool> {
        let field = self.field(item);
        self.store.hdel(&self.name, &field).await
    }
}
