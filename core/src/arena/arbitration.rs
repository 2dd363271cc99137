//! Winner selection and the handoff protocol.
//!
//! Crowning a session records the winning exchange, builds the handoff URL
//! for the destination, and hands that URL back to the browsing surface.
//! The winner-log notify is best effort: a failure is logged and the
//! protocol carries on, because the coordinator unconditionally schedules
//! the arena reset either way.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Url;
use rusqlite::params;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::task::spawn_blocking;
use uuid::Uuid;

use crate::db::DbPool;
use crate::logging::log_event;

/// Continuation instruction appended after the winning reply. The exact
/// wording is part of the handoff contract with the destination.
pub const CONTINUATION_SUFFIX: &str =
    "Await further instructions. If you understood, reply with \"Let's keep things going\".";

/// The winning exchange, built once per arbitration and not retained after
/// the handoff.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WinnerRecord {
    pub instance_id: String,
    pub prompt: String,
    pub response: String,
    pub timestamp: i64,
}

#[async_trait]
pub trait WinnerLog: Send + Sync {
    async fn record(&self, record: &WinnerRecord) -> Result<()>;
}

/// Winner log backed by the `winner_selections` table.
pub struct StoredWinnerLog {
    pool: DbPool,
}

impl StoredWinnerLog {
    pub fn new(pool: DbPool) -> Arc<Self> {
        Arc::new(Self { pool })
    }
}

#[async_trait]
impl WinnerLog for StoredWinnerLog {
    async fn record(&self, record: &WinnerRecord) -> Result<()> {
        let pool = self.pool.clone();
        let record = record.clone();
        spawn_blocking(move || {
            let conn = pool.get()?;
            conn.execute(
                "INSERT INTO winner_selections (id, instance_id, prompt, response, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    Uuid::new_v4().to_string(),
                    record.instance_id,
                    record.prompt,
                    record.response,
                    record.timestamp,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(|err| anyhow!(err.to_string()))?
    }
}

/// Outcome of the handoff protocol, surfaced through the API so the
/// browsing context can open the destination.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArbitrationReport {
    pub handoff_url: Option<String>,
    pub notified: bool,
}

pub fn winner_record(instance_id: &str, prompt: &str, response: &str) -> WinnerRecord {
    WinnerRecord {
        instance_id: instance_id.to_string(),
        prompt: prompt.to_string(),
        response: response.to_string(),
        timestamp: OffsetDateTime::now_utc().unix_timestamp(),
    }
}

/// Append the winning prompt and the wrapped reply to the destination URL.
pub fn build_handoff_url(destination: &str, record: &WinnerRecord) -> Result<String> {
    let mut url = Url::parse(destination).map_err(|_| crate::errors::ArenaError::BadDestination)?;
    url.query_pairs_mut()
        .append_pair("prompt", &format!("Prompt:{}", record.prompt))
        .append_pair(
            "reply",
            &format!("Reply:{}{}", record.response, CONTINUATION_SUFFIX),
        );
    Ok(url.into())
}

/// Steps 2-4 of the winner protocol: notify, build, surface. Nothing in
/// here aborts the protocol; the caller schedules the arena reset no matter
/// what this returns.
pub async fn execute(
    winner_log: &Arc<dyn WinnerLog>,
    pool: &DbPool,
    record: &WinnerRecord,
    destination: Option<&str>,
) -> ArbitrationReport {
    let notified = match winner_log.record(record).await {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(instance = %record.instance_id, error = %err, "winner log notify failed");
            log_swallowed(pool, &record.instance_id, &err.to_string());
            false
        }
    };

    let handoff_url = match destination {
        Some(dest) => match build_handoff_url(dest, record) {
            Ok(url) => Some(url),
            Err(err) => {
                tracing::warn!(instance = %record.instance_id, error = %err, "handoff URL construction failed");
                None
            }
        },
        None => {
            tracing::warn!(instance = %record.instance_id, "no handoff destination configured");
            None
        }
    };

    if handoff_url.is_some() {
        let pool = pool.clone();
        let instance_id = record.instance_id.clone();
        tokio::spawn(async move {
            if let Ok(conn) = pool.get() {
                let _ = log_event(
                    &conn,
                    "info",
                    Some("ARB-0300"),
                    "arena.arbitration",
                    "Winner crowned",
                    Some("Handoff destination surfaced to the browsing context"),
                    Some(serde_json::json!({ "instance": instance_id })),
                );
            }
        });
    }

    ArbitrationReport {
        handoff_url,
        notified,
    }
}

fn log_swallowed(pool: &DbPool, instance_id: &str, message: &str) {
    let pool = pool.clone();
    let instance_id = instance_id.to_string();
    let message = message.to_string();
    tokio::spawn(async move {
        if let Ok(conn) = pool.get() {
            let _ = log_event(
                &conn,
                "warn",
                Some("ARB-0301"),
                "arena.arbitration",
                "Winner log notify failed",
                Some("Ignored; the handoff continues regardless"),
                Some(serde_json::json!({
                    "instance": instance_id,
                    "error": message,
                })),
            );
        }
    });
}
