use async_trait::async_trait;
use std::time::Duration;

use super::schema::Database;
use super::{Cache, CacheLookup, StorageError};

impl Database {
    // ========================================================================
    // Feed Cache Operations
    // ========================================================================

    /// Cache a rendered feed document with a TTL.
    ///
    /// Inserts or replaces the cached value for the given key.
    /// `expires_at` is computed as `now + ttl` in SQLite's clock, so
    /// comparisons on read never depend on the process clock.
    pub async fn cache_set(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StorageError> {
        let ttl_secs = ttl.as_secs().max(1);
        let ttl_modifier = format!("+{ttl_secs} seconds");
        let size_bytes = value.len() as i64;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO feed_cache
                (key, value, fetched_at, expires_at, size_bytes)
            VALUES (?, ?, datetime('now'), datetime('now', ?), ?)
        "#,
        )
        .bind(key)
        .bind(value)
        .bind(&ttl_modifier)
        .bind(size_bytes)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Read a cached document. Expired entries read as a miss.
    pub async fn cache_get(&self, key: &str) -> Result<CacheLookup, StorageError> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT value
            FROM feed_cache
            WHERE key = ? AND expires_at > datetime('now')
        "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some((value,)) => CacheLookup::Hit(value),
            None => CacheLookup::Miss,
        })
    }

    /// Remove a cache entry. Missing keys are a no-op.
    pub async fn cache_delete(&self, key: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM feed_cache WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete all expired cache entries. Returns the number evicted.
    ///
    /// Expired rows are already invisible to readers; this just reclaims
    /// the space, so it can run on any schedule.
    pub async fn cache_evict_expired(&self) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM feed_cache WHERE expires_at < datetime('now')")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Cache for Database {
    async fn get(&self, key: &str) -> Result<CacheLookup, StorageError> {
        self.cache_get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError> {
        self.cache_set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.cache_delete(key).await
    }
}
