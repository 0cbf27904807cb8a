use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;

use super::schema::Database;
use super::{Credential, CredentialStore, StorageError};

impl Database {
    // ========================================================================
    // Credential Operations
    // ========================================================================

    /// Fetch a live credential by kind. Expired credentials read as absent.
    pub async fn credential_get(&self, kind: &str) -> Result<Option<Credential>, StorageError> {
        let row: Option<(String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT value, expires_at
            FROM credentials
            WHERE kind = ?
              AND (expires_at IS NULL OR expires_at > datetime('now'))
        "#,
        )
        .bind(kind)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(value, expires_at)| Credential {
            value: SecretString::from(value),
            expires_at: expires_at.and_then(|raw| parse_expiry(kind, &raw)),
        }))
    }

    /// Store a credential, replacing any previous one of the same kind.
    pub async fn credential_set(
        &self,
        kind: &str,
        value: SecretString,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let ttl_modifier = ttl.map(|ttl| format!("+{} seconds", ttl.as_secs().max(1)));

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO credentials (kind, value, updated_at, expires_at)
            VALUES (?, ?, datetime('now'), datetime('now', ?))
        "#,
        )
        .bind(kind)
        .bind(value.expose_secret())
        .bind(&ttl_modifier)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete a credential. Missing kinds are a no-op, so concurrent purges
    /// from several fetch clients are harmless.
    pub async fn credential_delete(&self, kind: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM credentials WHERE kind = ?")
            .bind(kind)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// SQLite stores expiries as `YYYY-MM-DD HH:MM:SS` in UTC.
fn parse_expiry(kind: &str, raw: &str) -> Option<DateTime<Utc>> {
    match chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        Ok(naive) => Some(naive.and_utc()),
        Err(e) => {
            tracing::warn!(kind = %kind, error = %e, "Unparseable credential expiry, treating as none");
            None
        }
    }
}

#[async_trait]
impl CredentialStore for Database {
    async fn get(&self, kind: &str) -> Result<Option<Credential>, StorageError> {
        self.credential_get(kind).await
    }

    async fn set(
        &self,
        kind: &str,
        value: SecretString,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        self.credential_set(kind, value, ttl).await
    }

    async fn delete(&self, kind: &str) -> Result<(), StorageError> {
        self.credential_delete(kind).await
    }
}
