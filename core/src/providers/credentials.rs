//! Credential storage and the key resolver seam.
//!
//! Secrets are kept in the `ai_credentials` table, base64 encoded at rest.
//! The orchestrator never reads the table directly; it goes through the
//! [`KeyResolver`] trait so sessions can cache the resolved value and tests
//! can substitute a stub.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64_ENGINE;
use base64::Engine;
use rusqlite::{params, Connection, OptionalExtension};
use time::OffsetDateTime;
use tokio::task::spawn_blocking;

use crate::db::DbPool;
use crate::logging::log_event;

#[async_trait]
pub trait KeyResolver: Send + Sync {
    /// Return the credential for a provider, or `None` when nothing is
    /// stored. Dispatch proceeds with an empty credential in that case; the
    /// provider's rejection surfaces through the normal outcome paths.
    async fn resolve(&self, provider_key: &str) -> Result<Option<String>>;
}

/// Key resolver backed by the SQLite credential table.
pub struct StoredKeyResolver {
    pool: DbPool,
}

impl StoredKeyResolver {
    pub fn new(pool: DbPool) -> Arc<Self> {
        Arc::new(Self { pool })
    }
}

#[async_trait]
impl KeyResolver for StoredKeyResolver {
    async fn resolve(&self, provider_key: &str) -> Result<Option<String>> {
        let pool = self.pool.clone();
        let provider = provider_key.to_string();
        spawn_blocking(move || {
            let conn = pool.get()?;
            load_secret(&conn, &provider)
        })
        .await
        .map_err(|err| anyhow!(err.to_string()))?
    }
}

/// Store a credential for a provider. An empty key deletes the stored entry.
pub fn save_key(conn: &Connection, provider: &str, api_key: &str) -> Result<()> {
    let trimmed = api_key.trim();
    if trimmed.is_empty() {
        conn.execute(
            "DELETE FROM ai_credentials WHERE provider_id = ?1",
            params![provider],
        )?;
    } else {
        let encoded = B64_ENGINE.encode(trimmed.as_bytes());
        let now = OffsetDateTime::now_utc().unix_timestamp();
        conn.execute(
            "INSERT INTO ai_credentials (provider_id, secret, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(provider_id) DO UPDATE SET secret = excluded.secret, updated_at = excluded.updated_at",
            params![provider, encoded, now],
        )?;
    }
    let _ = log_event(
        conn,
        "info",
        Some("KEY-0001"),
        "providers.settings",
        "Provider credential updated",
        Some("Stored via the settings surface"),
        Some(serde_json::json!({ "provider": provider })),
    );
    Ok(())
}

pub fn load_secret(conn: &Connection, provider: &str) -> Result<Option<String>> {
    let secret: Option<String> = conn
        .query_row(
            "SELECT secret FROM ai_credentials WHERE provider_id = ?1",
            params![provider],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(s) = secret {
        let decoded = B64_ENGINE
            .decode(s.as_bytes())
            .map_err(|_| anyhow!("Failed to decode stored credential"))?;
        let value = String::from_utf8(decoded)
            .map_err(|_| anyhow!("Stored credential was not valid UTF-8"))?;
        Ok(Some(value))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection as SqliteConnection;

    fn test_conn() -> SqliteConnection {
        let conn = SqliteConnection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE ai_credentials (provider_id TEXT PRIMARY KEY, secret TEXT, created_at INTEGER, updated_at INTEGER);
             CREATE TABLE event_log (id TEXT PRIMARY KEY, ts INTEGER, level TEXT, code TEXT, module TEXT, message TEXT, detail TEXT, data TEXT);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn save_then_load_round_trips() {
        let conn = test_conn();
        save_key(&conn, "openai", "sk-test-123").unwrap();
        assert_eq!(load_secret(&conn, "openai").unwrap().as_deref(), Some("sk-test-123"));
        assert_eq!(load_secret(&conn, "claude").unwrap(), None);
    }

    #[test]
    fn secrets_are_not_stored_in_plain_text() {
        let conn = test_conn();
        save_key(&conn, "openai", "sk-test-123").unwrap();
        let raw: String = conn
            .query_row(
                "SELECT secret FROM ai_credentials WHERE provider_id = 'openai'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_ne!(raw, "sk-test-123");
    }

    #[test]
    fn empty_key_deletes_the_entry() {
        let conn = test_conn();
        save_key(&conn, "openai", "sk-test-123").unwrap();
        save_key(&conn, "openai", "   ").unwrap();
        assert_eq!(load_secret(&conn, "openai").unwrap(), None);
    }
}
