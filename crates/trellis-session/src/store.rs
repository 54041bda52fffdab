//! Hash-semantics key/value stores.
//!
//! A store holds named hashes of byte values. Every hash may carry a time to
//! live; an expired hash reads as absent.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use trellis_core::BoxFuture;

use crate::error::StoreResult;

/// A backend offering `HGET`/`HSET`/`HDEL`/`EXPIRE` semantics.
pub trait SessionStore: Send + Sync + 'static {
    /// Reads `field` of hash `name`.
    fn hget<'a>(&'a self, name: &'a str, field: &'a str) -> BoxFuture<'a, StoreResult<Option<Bytes>>>;

    /// Writes `field` of hash `name`, creating the hash if needed.
    fn hset<'a>(&'a self, name: &'a str, field: &'a str, value: Bytes) -> BoxFuture<'a, StoreResult<()>>;

    /// Deletes `field` of hash `name`. Returns whether it existed.
    fn hdel<'a>(&'a self, name: &'a str, field: &'a str) -> BoxFuture<'a, StoreResult<bool>>;

    /// Sets the time to live of hash `name`. Returns whether the hash exists.
    fn expire<'a>(&'a self, name: &'a str, ttl: Duration) -> BoxFuture<'a, StoreResult<bool>>;
}

#[derive(Debug, Default)]
struct Hash {
    fields: HashMap<String, Bytes>,
    expires_at: Option<Instant>,
}

impl Hash {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// An in-process store. Expired hashes are dropped when next touched.
#[derive(Debug, Default)]
pub struct MemoryStore {
    hashes: DashMap<String, Hash>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of hashes, expired ones included until touched.
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    /// Returns true if the store holds no hash.
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Drops every expired hash.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.hashes.retain(|_, hash| !hash.is_expired(now));
    }

    fn drop_if_expired(&self, name: &str) {
        let now = Instant::now();
        self.hashes.remove_if(name, |_, hash| hash.is_expired(now));
    }

    fn get(&self, name: &str, field: &str) -> Option<Bytes> {
        self.drop_if_expired(name);
        self.hashes
            .get(name)
            .and_then(|hash| hash.fields.get(field).cloned())
    }

    fn set(&self, name: &str, field: &str, value: Bytes) {
        self.drop_if_expired(name);
        self.hashes
            .entry(name.to_string())
            .or_default()
            .fields
            .insert(field.to_string(), value);
    }

    fn delete(&self, name: &str, field: &str) -> bool {
        self.drop_if_expired(name);
        let Some(mut hash) = self.hashes.get_mut(name) else {
            return false;
        };
        let existed = hash.fields.remove(field).is_some();
        let now_empty = hash.fields.is_empty();
        drop(hash);
        if now_empty {
            self.hashes.remove_if(name, |_, h| h.fields.is_empty());
        }
        existed
    }

    fn set_ttl(&self, name: &str, ttl: Duration) -> bool {
        self.drop_if_expired(name);
        match self.hashes.get_mut(name) {
            Some(mut hash) => {
                hash.expires_at = Some(Instant::now() + ttl);
                true
            }
            None => false,
        }
    }
}

impl SessionStore for MemoryStore {
    fn hget<'a>(&'a self, name: &'a str, field: &'a str) -> BoxFuture<'a, StoreResult<Option<Bytes>>> {
        Box::pin(async move { Ok(self.get(name, field)) })
    }

    fn hset<'a>(&'a self, name: &'a str, field: &'a str, value: Bytes) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            self.set(name, field, value);
            Ok(())
        })
    }

    fn hdel<'a>(&'a self, name: &'a str, field: &'a str) -> BoxFuture<'a, StoreResult<bool>> {
        Box::pin(async move { Ok(self.delete(name, field)) })
    }

    fn expire<'a>(&'a self, name: &'a str, ttl: Duration) -> BoxFuture<'a, StoreResult<bool>> {
        Box::pin(async move { Ok(self.set_ttl(name, ttl)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_operations() {
        let store = MemoryStore::new();
        assert_eq!(store.hget("h", "f").await.unwrap(), None);

        store.hset("h", "f", Bytes::from_static(b"v")).await.unwrap();
        assert_eq!(store.hget("h", "f").await.unwrap(), Some(Bytes::from_static(b"v")));
        assert_eq!(store.hget("h", "other").await.unwrap(), None);

        assert!(store.hdel("h", "f").await.unwrap());
        assert!(!store.hdel("h", "f").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_expire_requires_existing_hash() {
        let store = MemoryStore::new();
        assert!(!store.expire("h", Duration::from_secs(1)).await.unwrap());
        store.hset("h", "f", Bytes::from_static(b"v")).await.unwrap();
        assert!(store.expire("h", Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_hash_reads_as_absent() {
        let store = MemoryStore::new();
        store.hset("h", "f", Bytes::from_static(b"v")).await.unwrap();
        store.expire("h", Duration::ZERO).await.unwrap();

        assert_eq!(store.hget("h", "f").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = MemoryStore::new();
        store.hset("a", "f", Bytes::from_static(b"1")).await.unwrap();
        store.hset("b", "f", Bytes::from_static(b"2")).await.unwrap();
        store.expire("a", Duration::ZERO).await.unwrap();
        store.expire("b", Duration::from_secs(60)).await.unwrap();

        store.purge_expired();
        assert_eq!(store.len(), 1);
    }
}
