//! Server-Side Session Store
//!
//! Keyed JSON entries bound to opaque session tokens. Tokens are random and
//! only their SHA-256 hash is stored, so a leaked table row cannot be turned
//! back into a usable token. Entries expire on their own TTL.

use chrono::{Duration, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::PgPool;
use thiserror::Error;

use crate::utils::error::AppError;
use crate::utils::security::{generate_secure_token, hash_sensitive_data};

/// Custom error types for the session store
#[derive(Error, Debug)]
pub enum SessionStoreError {
    /// Stored value could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<SessionStoreError> for AppError {
    fn from(err: SessionStoreError) -> Self {
        match err {
            SessionStoreError::Serialization(e) => {
                AppError::Internal(format!("Session serialization error: {}", e))
            }
            SessionStoreError::Database(e) => AppError::Database(e),
        }
    }
}

/// Result type for session store operations
pub type SessionStoreResult<T> = Result<T, SessionStoreError>;

/// Postgres-backed session store with per-entry TTL
#[derive(Clone)]
pub struct SessionStore {
    pool: PgPool,
}

impl SessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Mint a fresh opaque session token for a new client session
    pub fn new_session_token() -> String {
        generate_secure_token(48)
    }

    /// Store a JSON value under (session token, entry key) with a TTL
    pub async fn put<T: Serialize>(
        &self,
        session_token: &str,
        entry_key: &str,
        value: &T,
        ttl_minutes: i64,
    ) -> SessionStoreResult<()> {
        let key_hash = hash_sensitive_data(session_token);
        let json = serde_json::to_value(value)?;
        let expires_at = Utc::now() + Duration::minutes(ttl_minutes);

        sqlx::query!(
            r#"
            INSERT INTO session_entries (key_hash, entry_key, value, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (key_hash, entry_key)
            DO UPDATE SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at
            "#,
            key_hash,
            entry_key,
            json,
            expires_at
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetch a typed value, ignoring expired entries
    pub async fn get<T: DeserializeOwned>(
        &self,
        session_token: &str,
        entry_key: &str,
    ) -> SessionStoreResult<Option<T>> {
        let key_hash = hash_sensitive_data(session_token);

        let row = sqlx::query!(
            r#"
            SELECT value FROM session_entries
            WHERE key_hash = $1 AND entry_key = $2 AND expires_at > NOW()
            "#,
            key_hash,
            entry_key
        )
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(serde_json::from_value(row.value)?)),
            None => Ok(None),
        }
    }

    /// Remove one entry from a session
    pub async fn remove(&self, session_token: &str, entry_key: &str) -> SessionStoreResult<()> {
        let key_hash = hash_sensitive_data(session_token);

        sqlx::query!(
            "DELETE FROM session_entries WHERE key_hash = $1 AND entry_key = $2",
            key_hash,
            entry_key
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete expired entries; returns the number removed
    pub async fn cleanup_expired(&self) -> SessionStoreResult<u64> {
        let result = sqlx::query!("DELETE FROM session_entries WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct TestEntry {
        note: String,
        count: u32,
    }

    #[sqlx::test]
    async fn test_put_get_roundtrip(pool: sqlx::PgPool) {
        let store = SessionStore::new(pool);
        let token = SessionStore::new_session_token();
        let entry = TestEntry {
            note: "hello".to_string(),
            count: 3,
        };

        store.put(&token, "test", &entry, 10).await.unwrap();
        let loaded: Option<TestEntry> = store.get(&token, "test").await.unwrap();
        assert_eq!(loaded, Some(entry));
    }

    #[sqlx::test]
    async fn test_get_wrong_token_returns_none(pool: sqlx::PgPool) {
        let store = SessionStore::new(pool);
        let token = SessionStore::new_session_token();
        let entry = TestEntry {
            note: "hidden".to_string(),
            count: 1,
        };

        store.put(&token, "test", &entry, 10).await.unwrap();
        let other = SessionStore::new_session_token();
        let loaded: Option<TestEntry> = store.get(&other, "test").await.unwrap();
        assert!(loaded.is_none());
    }

    #[sqlx::test]
    async fn test_expired_entry_ignored(pool: sqlx::PgPool) {
        let store = SessionStore::new(pool);
        let token = SessionStore::new_session_token();
        let entry = TestEntry {
            note: "stale".to_string(),
            count: 0,
        };

        // Negative TTL writes an already-expired row
        store.put(&token, "test", &entry, -1).await.unwrap();
        let loaded: Option<TestEntry> = store.get(&token, "test").await.unwrap();
        assert!(loaded.is_none());

        let removed = store.cleanup_expired().await.unwrap();
        assert_eq!(removed, 1);
    }

    #[sqlx::test]
    async fn test_remove(pool: sqlx::PgPool) {
        let store = SessionStore::new(pool);
        let token = SessionStore::new_session_token();
        let entry = TestEntry {
            note: "gone".to_string(),
            count: 2,
        };

        store.put(&token, "test", &entry, 10).await.unwrap();
        store.remove(&token, "test").await.unwrap();
        let loaded: Option<TestEntry> = store.get(&token, "test").await.unwrap();
        assert!(loaded.is_none());
    }
}
