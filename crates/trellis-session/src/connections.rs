//! Shared store connections.
//!
//! Handlers name their backend by a connection string such as
//! `memory://local:0`. The [`Connections`] registry creates the store the
//! first time a named slot is asked for and hands out the same `Arc` on
//! every later request. Backends other than the in-process one are plugged
//! in by scheme.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;
use url::Url;

use crate::error::{StoreError, StoreResult};
use crate::store::{MemoryStore, SessionStore};

/// Builds a store from a parsed connection string.
pub type StoreConstructor = Arc<dyn Fn(&Url) -> StoreResult<Arc<dyn SessionStore>> + Send + Sync>;

/// Scheme of the built-in in-process store.
pub const MEMORY_SCHEME: &str = "memory";

/// Lazily created, shared store connections keyed by slot name.
pub struct Connections {
    slots: DashMap<String, Arc<dyn SessionStore>>,
    constructors: HashMap<String, StoreConstructor>,
}

impl fmt::Debug for Connections {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots: Vec<String> = self.slots.iter().map(|e| e.key().clone()).collect();
        let mut schemes: Vec<&String> = self.constructors.keys().collect();
        schemes.sort();
        f.debug_struct("Connections")
            .field("slots", &slots)
            .field("schemes", &schemes)
            .finish()
    }
}

impl Default for Connections {
    fn default() -> Self {
        Self::new()
    }
}

impl Connections {
    /// Creates a registry that knows the `memory` scheme.
    #[must_use]
    pub fn new() -> Self {
        let mut constructors: HashMap<String, StoreConstructor> = HashMap::new();
        constructors.insert(
            MEMORY_SCHEME.to_string(),
            Arc::new(|_url: &Url| -> StoreResult<Arc<dyn SessionStore>> {
                Ok(Arc::new(MemoryStore::new()))
            }),
        );
        Self {
            slots: DashMap::new(),
            constructors,
        }
    }

    /// Registers a constructor for `scheme`.
    #[must_use]
    pub fn with_scheme<F>(mut self, scheme: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&Url) -> StoreResult<Arc<dyn SessionStore>> + Send + Sync + 'static,
    {
        self.constructors
            .insert(scheme.into().to_ascii_lowercase(), Arc::new(constructor));
        self
    }

    /// Puts an existing store into `slot`, replacing what was there.
    pub fn insert(&self, slot: impl Into<String>, store: Arc<dyn SessionStore>) {
        self.slots.insert(slot.into(), store);
    }

    /// Returns the store in `slot`, if connected.
    pub fn get(&self, slot: &str) -> Option<Arc<dyn SessionStore>> {
        self.slots.get(slot).map(|s| Arc::clone(s.value()))
    }

    /// Returns the store in `slot`, connecting with `connection` on first use.
    ///
    /// Once a slot is connected its store is reused and `connection` is not
    /// looked at again.
    pub fn connect(&self, slot: &str, connection: &str) -> StoreResult<Arc<dyn SessionStore>> {
        if let Some(store) = self.get(slot) {
            return Ok(store);
        }

        let url = parse_connection(connection)?;
        let constructor = self
            .constructors
            .get(url.scheme())
            .ok_or_else(|| StoreError::UnsupportedScheme {
                scheme: url.scheme().to_string(),
            })?;

        let store = match self.slots.entry(slot.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => Arc::clone(existing.get()),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let store = constructor(&url)?;
                info!(slot = %slot, scheme = %url.scheme(), "session store connected");
                vacant.insert(Arc::clone(&store));
                store
            }
        };
        Ok(store)
    }
}

/// Parses a `scheme://host:port` connection string.
pub fn parse_connection(connection: &str) -> StoreResult<Url> {
    let invalid = |message: String| StoreError::InvalidUrl {
        url: connection.to_string(),
        message,
    };
    let url = Url::parse(connection.trim()).map_err(|e| invalid(e.to_string()))?;
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}
