//! The ordered registry of configured AI instances.
//!
//! Rows persist in `ai_instances` so the arena comes back up with the same
//! instances the user configured; insertion order is preserved through an
//! explicit position column. ID uniqueness is the caller's contract.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::task::spawn_blocking;

use super::credentials::KeyResolver;
use crate::db::DbPool;
use crate::logging::log_event;

/// Identity of one configured provider session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiInstance {
    pub id: String,
    pub provider_key: String,
    pub model: String,
    pub display_name: String,
    pub icon_ref: Option<String>,
    pub destination_url: Option<String>,
}

/// Read-mostly store of the configured instances, shared by the arena and
/// the settings surface. Credential resolution is delegated to the injected
/// [`KeyResolver`].
pub struct ProviderRegistry {
    pool: DbPool,
    resolver: Arc<dyn KeyResolver>,
}

impl ProviderRegistry {
    pub fn new(pool: DbPool, resolver: Arc<dyn KeyResolver>) -> Arc<Self> {
        Arc::new(Self { pool, resolver })
    }

    /// Enumerate instances in insertion order.
    pub async fn list(&self) -> Result<Vec<AiInstance>> {
        let pool = self.pool.clone();
        spawn_blocking(move || {
            let conn = pool.get()?;
            list_instances(&conn)
        })
        .await
        .map_err(|err| anyhow!(err.to_string()))?
    }

    /// Insert or update an instance, keeping its position on update.
    pub async fn upsert(&self, instance: AiInstance) -> Result<AiInstance> {
        let pool = self.pool.clone();
        let stored = instance.clone();
        spawn_blocking(move || {
            let conn = pool.get()?;
            upsert_instance(&conn, &stored)?;
            let _ = log_event(
                &conn,
                "info",
                Some("REG-0001"),
                "providers.settings",
                "AI instance registered",
                Some("Registry updated via the settings surface"),
                Some(serde_json::json!({
                    "id": stored.id,
                    "provider": stored.provider_key,
                    "model": stored.model,
                })),
            );
            Ok(stored)
        })
        .await
        .map_err(|err| anyhow!(err.to_string()))?
    }

    /// Resolve the credential for a provider key via the Key Resolver.
    pub async fn resolve_credential(&self, provider_key: &str) -> Result<Option<String>> {
        self.resolver.resolve(provider_key).await
    }
}

pub fn list_instances(conn: &Connection) -> Result<Vec<AiInstance>> {
    let mut stmt = conn.prepare(
        "SELECT id, provider_key, model, display_name, icon_ref, destination_url
         FROM ai_instances ORDER BY position ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(AiInstance {
            id: row.get(0)?,
            provider_key: row.get(1)?,
            model: row.get(2)?,
            display_name: row.get(3)?,
            icon_ref: row.get(4)?,
            destination_url: row.get(5)?,
        })
    })?;
    let mut instances = Vec::new();
    for row in rows {
        instances.push(row?);
    }
    Ok(instances)
}

pub fn upsert_instance(conn: &Connection, instance: &AiInstance) -> Result<()> {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let existing: Option<i64> = conn
        .query_row(
            "SELECT position FROM ai_instances WHERE id = ?1",
            params![instance.id],
            |row| row.get(0),
        )
        .optional()?;
    let position = match existing {
        Some(position) => position,
        None => {
            conn.query_row(
                "SELECT COALESCE(MAX(position), 0) + 1 FROM ai_instances",
                [],
                |row| row.get(0),
            )?
        }
    };
    conn.execute(
        "INSERT INTO ai_instances (id, provider_key, model, display_name, icon_ref, destination_url, position, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
         ON CONFLICT(id) DO UPDATE SET
             provider_key = excluded.provider_key,
             model = excluded.model,
             display_name = excluded.display_name,
             icon_ref = excluded.icon_ref,
             destination_url = excluded.destination_url,
             updated_at = excluded.updated_at",
        params![
            instance.id,
            instance.provider_key,
            instance.model,
            instance.display_name,
            instance.icon_ref,
            instance.destination_url,
            position,
            now,
        ],
    )?;
    Ok(())
}
