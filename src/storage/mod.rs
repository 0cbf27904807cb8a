//! Cache and credential persistence.
//!
//! Two seams are defined here and consumed elsewhere:
//!
//! - [`Cache`] — TTL'd key/value store for rendered feed documents. A miss
//!   is an observable state ([`CacheLookup::Miss`]), never an error.
//! - [`CredentialStore`] — shared store for platform credentials. The fetch
//!   client is the only writer: it deletes a credential when the remote
//!   service rejects it, so the next call is forced to re-acquire one.
//!
//! [`Database`] implements both on SQLite; the memory backends exist for
//! tests and cacheless deployments.

mod credentials;
mod feed_cache;
mod memory;
mod schema;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use std::time::Duration;
use thiserror::Error;

pub use memory::{MemoryCache, MemoryCredentialStore};
pub use schema::Database;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum StorageError {
    /// Another process has the cache database locked
    #[error("Another instance appears to have the cache database locked")]
    InstanceLocked,

    /// Migration failed
    #[error("Cache migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Storage error: {0}")]
    Other(#[from] sqlx::Error),
}

impl StorageError {
    /// Map lock-flavoured sqlx errors to [`StorageError::InstanceLocked`].
    ///
    /// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_CANTOPEN (14) all
    /// surface as message text from sqlx, so string matching is the only
    /// portable check.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let message = err.to_string().to_lowercase();
        if message.contains("database is locked")
            || message.contains("database table is locked")
            || message.contains("sqlite_busy")
            || message.contains("sqlite_locked")
            || message.contains("unable to open database file")
        {
            return StorageError::InstanceLocked;
        }
        StorageError::Other(err)
    }
}

// ============================================================================
// Cache
// ============================================================================

/// Outcome of a cache read. Absence is not an error condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// A live (unexpired) value.
    Hit(String),
    /// No entry, or the entry has expired.
    Miss,
}

/// TTL'd key/value store for rendered feed documents.
///
/// Values are opaque strings. Concurrent access from multiple coordinators
/// is safe; each coordinator is the sole writer for its own family's keys.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<CacheLookup, StorageError>;

    /// Write a value with a TTL. Overwrites any existing entry.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError>;

    /// Remove an entry. Deleting a missing key is a no-op.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

// ============================================================================
// Credentials
// ============================================================================

/// A platform credential with an optional expiry.
///
/// The value is held as a [`SecretString`] so it never appears in Debug
/// output or logs.
#[derive(Clone)]
pub struct Credential {
    pub value: SecretString,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: SecretString::from(value.into()),
            expires_at: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expiry) if expiry <= now)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Shared store for platform credentials, keyed by kind (e.g. `"forum"`).
///
/// Deletion is idempotent, which is what makes the fetch client's
/// purge-on-auth-failure safe without extra locking.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fetch a live credential. Expired credentials read as absent.
    async fn get(&self, kind: &str) -> Result<Option<Credential>, StorageError>;

    async fn set(
        &self,
        kind: &str,
        value: SecretString,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError>;

    async fn delete(&self, kind: &str) -> Result<(), StorageError>;
}
