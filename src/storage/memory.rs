//! In-process backends for tests and cacheless deployments.

use async_trait::async_trait;
use chrono::Utc;
use lru::LruCache;
use secrecy::SecretString;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{Cache, CacheLookup, Credential, CredentialStore, StorageError};

const DEFAULT_CAPACITY: usize = 1024;

struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

/// Bounded in-process cache with per-entry TTL.
///
/// LRU eviction caps memory; expiry is checked on read, so a stale entry
/// never leaks out even if it has not been evicted yet.
pub struct MemoryCache {
    entries: Mutex<LruCache<String, MemoryEntry>>,
}

impl MemoryCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .unwrap_or_else(|| NonZeroUsize::new(DEFAULT_CAPACITY).unwrap());
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<CacheLookup, StorageError> {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                Ok(CacheLookup::Hit(entry.value.clone()))
            }
            Some(_) => {
                entries.pop(key);
                Ok(CacheLookup::Miss)
            }
            None => Ok(CacheLookup::Miss),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError> {
        let entry = MemoryEntry {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        };
        self.entries
            .lock()
            .expect("cache mutex poisoned")
            .put(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.entries
            .lock()
            .expect("cache mutex poisoned")
            .pop(key);
        Ok(())
    }
}

/// In-process credential store.
#[derive(Default)]
pub struct MemoryCredentialStore {
    credentials: Mutex<HashMap<String, Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, kind: &str) -> Result<Option<Credential>, StorageError> {
        let credentials = self.credentials.lock().expect("credential mutex poisoned");
        Ok(credentials
            .get(kind)
            .filter(|credential| !credential.is_expired(Utc::now()))
            .cloned())
    }

    async fn set(
        &self,
        kind: &str,
        value: SecretString,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let expires_at = ttl.and_then(|ttl| {
            chrono::Duration::from_std(ttl)
                .ok()
                .map(|ttl| Utc::now() + ttl)
        });
        self.credentials
            .lock()
            .expect("credential mutex poisoned")
            .insert(kind.to_string(), Credential { value, expires_at });
        Ok(())
    }

    async fn delete(&self, kind: &str) -> Result<(), StorageError> {
        self.credentials
            .lock()
            .expect("credential mutex poisoned")
            .remove(kind);
        Ok(())
    }
}
