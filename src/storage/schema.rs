use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::StorageError;

// ============================================================================
// Database
// ============================================================================

/// SQLite-backed store for the feed cache and credential tables.
///
/// Cloning is cheap (shared pool). One instance is safe to share across
/// coordinators and fetch clients.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InstanceLocked` if another process has the
    /// database locked, `StorageError::Migration` if the schema could not
    /// be created.
    pub async fn open(path: &str) -> Result<Self, StorageError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // Restrict the database file to the owning user before the pool
        // touches it. Credentials live in here.
        #[cfg(unix)]
        if path != ":memory:" {
            use std::os::unix::fs::PermissionsExt;
            let db_path = std::path::Path::new(path);
            if db_path.exists() {
                let perms = std::fs::Permissions::from_mode(0o600);
                if let Err(e) = std::fs::set_permissions(path, perms) {
                    tracing::warn!(path = %path, error = %e, "Failed to set database file permissions");
                }
            } else if let Some(parent) = db_path.parent() {
                if parent.exists() {
                    use std::os::unix::fs::OpenOptionsExt;
                    // Pre-create with mode 0600 so the file never exists with
                    // default umask permissions.
                    let _file = std::fs::OpenOptions::new()
                        .write(true)
                        .create_new(true)
                        .mode(0o600)
                        .open(db_path)
                        .ok(); // If creation fails, sqlx reports the error at connect.
                }
            }
        }

        // busy_timeout=5000: wait up to 5s for locks to clear before
        // reporting SQLITE_BUSY. Handles transient contention between a
        // coordinator write and an out-of-band credential refresh.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(StorageError::from_sqlx)?
            .pragma("busy_timeout", "5000");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(StorageError::from_sqlx)?;
        let db = Self { pool };
        db.migrate().await.map_err(|e| {
            let message = e.to_string().to_lowercase();
            if message.contains("database is locked") || message.contains("sqlite_busy") {
                StorageError::InstanceLocked
            } else {
                StorageError::Migration(e.to_string())
            }
        })?;
        Ok(db)
    }

    /// Create the schema inside one transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running against an existing
    /// database is a no-op; a failure mid-way rolls back cleanly.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query("PRAGMA busy_timeout = 5000")
            .execute(&self.pool)
            .await?;

        let mut tx = self.pool.begin().await?;

        // Rendered feed documents, keyed by the string form of a ResourceKey.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed_cache (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                fetched_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                size_bytes INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_feed_cache_expires ON feed_cache(expires_at)")
            .execute(&mut *tx)
            .await?;

        // Platform credentials, keyed by kind. expires_at is NULL for
        // credentials without a known expiry.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                kind TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                expires_at TEXT
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
