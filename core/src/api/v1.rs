//! Version 1 of the HTTP API.
//!
//! Handlers are intentionally thin wrappers that validate input, move
//! blocking database work onto the blocking pool, and return JSON-friendly
//! payloads to the UI. All orchestration semantics live in [`crate::arena`];
//! nothing here touches session state directly.

use std::sync::Arc;

use anyhow::anyhow;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;
use tokio::task::spawn_blocking;
use uuid::Uuid;

use crate::arena::{Arena, ArenaView, ArbitrationReport, SendReport};
use crate::db::DbPool;
use crate::errors::ArenaError;
use crate::providers::catalog::{self, ModelName};
use crate::providers::credentials;
use crate::providers::registry::{AiInstance, ProviderRegistry};

/// Shared state injected into each handler.
#[derive(Clone)]
pub struct ApiState {
    pub db: DbPool,
    pub arena: Arc<Arena>,
    pub registry: Arc<ProviderRegistry>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/db/status", get(db_status))
        .route("/api/events", get(list_events))
        .route("/api/models/provider", post(provider_models))
        .route("/api/keys/save", post(save_key))
        .route("/api/keys/get", post(get_key))
        .route("/api/instances", get(list_instances).post(upsert_instance))
        .route("/api/prompt", post(edit_prompt))
        .route("/api/prompt/send", post(send_prompt))
        .route("/api/sessions/{id}/prompt", post(edit_session_prompt))
        .route("/api/sessions/{id}/send", post(send_session))
        .route("/api/sessions/{id}/dismiss", post(dismiss_session))
        .route("/api/select-winner", post(select_winner))
        .route("/api/arena", get(arena_view))
        .with_state(state)
}

/// Maps catalogue errors onto HTTP statuses; everything else is a 500.
pub struct ApiError(anyhow::Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match self.0.downcast_ref::<ArenaError>() {
            Some(err @ ArenaError::InstanceNotFound) => (StatusCode::NOT_FOUND, Some(err.code())),
            Some(err @ ArenaError::NotArbitrable) => (StatusCode::CONFLICT, Some(err.code())),
            Some(err @ (ArenaError::UnknownProvider | ArenaError::BadDestination)) => {
                (StatusCode::BAD_REQUEST, Some(err.code()))
            }
            Some(err) => (StatusCode::INTERNAL_SERVER_ERROR, Some(err.code())),
            None => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };
        let body = json!({ "error": self.0.to_string(), "code": code });
        (status, Json(body)).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

/// Simple health-check endpoint for UI components.
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "ok": true,
        "ts": OffsetDateTime::now_utc().unix_timestamp(),
    }))
}

/// Inspect the SQLite catalog to confirm the database is reachable.
async fn db_status(State(state): State<ApiState>) -> Result<Json<serde_json::Value>, ApiError> {
    let pool = state.db.clone();
    let names = spawn_blocking(move || -> anyhow::Result<Vec<String>> {
        let conn = pool.get()?;
        let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type='table'")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    })
    .await
    .map_err(|err| anyhow!(err.to_string()))??;
    Ok(Json(json!({ "ok": true, "tables": names })))
}

/// Structured arena event surfaced for diagnostics.
#[derive(Serialize)]
pub struct ArenaEvent {
    pub id: String,
    pub ts: i64,
    pub level: String,
    pub code: Option<String>,
    pub message: String,
    pub detail: Option<String>,
    pub data: Option<serde_json::Value>,
}

#[derive(Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

/// Return recent arena events, newest first.
async fn list_events(
    State(state): State<ApiState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<ArenaEvent>>, ApiError> {
    let pool = state.db.clone();
    let limit = query.limit.unwrap_or(100);
    let events = spawn_blocking(move || -> anyhow::Result<Vec<ArenaEvent>> {
        let conn = pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, ts, level, code, message, detail, data FROM event_log WHERE module LIKE 'arena.%' ORDER BY ts DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            let data_str: Option<String> = row.get(6)?;
            let data = data_str.and_then(|raw| serde_json::from_str(&raw).ok());
            Ok(ArenaEvent {
                id: row.get(0)?,
                ts: row.get(1)?,
                level: row.get(2)?,
                code: row.get(3)?,
                message: row.get(4)?,
                detail: row.get(5)?,
                data,
            })
        })?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    })
    .await
    .map_err(|err| anyhow!(err.to_string()))??;
    Ok(Json(events))
}

#[derive(Deserialize)]
pub struct ProviderQuery {
    pub provider: String,
}

#[derive(Serialize)]
pub struct ProviderModelsOutput {
    pub models: Vec<ModelName>,
}

/// Enumerate the models offered for a provider.
async fn provider_models(
    State(state): State<ApiState>,
    Json(input): Json<ProviderQuery>,
) -> Result<Json<ProviderModelsOutput>, ApiError> {
    let pool = state.db.clone();
    let models = spawn_blocking(move || {
        let conn = pool.get()?;
        catalog::list_models(&conn, &input.provider)
    })
    .await
    .map_err(|err| anyhow!(err.to_string()))??;
    Ok(Json(ProviderModelsOutput { models }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveKeyInput {
    pub provider: String,
    pub api_key: String,
}

/// Store a provider credential.
async fn save_key(
    State(state): State<ApiState>,
    Json(input): Json<SaveKeyInput>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let pool = state.db.clone();
    spawn_blocking(move || {
        let conn = pool.get()?;
        credentials::save_key(&conn, &input.provider, &input.api_key)
    })
    .await
    .map_err(|err| anyhow!(err.to_string()))??;
    Ok(Json(json!({ "success": true })))
}

/// Fetch a provider credential, or null when none is stored.
async fn get_key(
    State(state): State<ApiState>,
    Json(input): Json<ProviderQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let api_key = state.registry.resolve_credential(&input.provider).await?;
    Ok(Json(json!({ "apiKey": api_key })))
}

/// Enumerate configured instances in insertion order.
async fn list_instances(
    State(state): State<ApiState>,
) -> Result<Json<Vec<AiInstance>>, ApiError> {
    Ok(Json(state.registry.list().await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertInstanceInput {
    pub id: Option<String>,
    pub provider: String,
    /// Accepted as a bare string or a `{name}` object; normalised on receipt.
    pub model: ModelName,
    pub display_name: Option<String>,
    pub icon_ref: Option<String>,
    pub destination_url: Option<String>,
}

/// Register or edit an instance; the new session joins the arena grid.
async fn upsert_instance(
    State(state): State<ApiState>,
    Json(input): Json<UpsertInstanceInput>,
) -> Result<Json<AiInstance>, ApiError> {
    if catalog::seed_for(&input.provider).is_none() {
        return Err(ArenaError::UnknownProvider.into());
    }
    let id = input.id.unwrap_or_else(|| {
        format!("{}-{}-{}", input.provider, input.model.name, Uuid::new_v4())
    });
    let instance = AiInstance {
        id,
        provider_key: input.provider,
        display_name: input
            .display_name
            .unwrap_or_else(|| input.model.name.clone()),
        model: input.model.name,
        icon_ref: input.icon_ref,
        destination_url: input.destination_url,
    };
    let stored = state.registry.upsert(instance).await?;
    state.arena.add_instance(stored.clone());
    Ok(Json(stored))
}

#[derive(Deserialize)]
pub struct PromptInput {
    pub text: String,
}

/// Master prompt edit; the first non-empty edit starts the conversation.
async fn edit_prompt(
    State(state): State<ApiState>,
    Json(input): Json<PromptInput>,
) -> Json<serde_json::Value> {
    let started = state.arena.prompt_edited(&input.text);
    Json(json!({ "started": started }))
}

/// Broadcast send: one trigger, every session re-dispatched.
async fn send_prompt(State(state): State<ApiState>) -> Json<SendReport> {
    Json(state.arena.send_requested().await)
}

/// Local override of one session's prompt.
async fn edit_session_prompt(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(input): Json<PromptInput>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.arena.session_prompt_edited(&id, &input.text)?;
    Ok(Json(json!({ "success": true })))
}

/// Single-session send from that session's own input.
async fn send_session(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let dispatched = state.arena.send_one(&id).await?;
    Ok(Json(json!({ "dispatched": dispatched })))
}

/// Dismiss one session's result.
async fn dismiss_session(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.arena.dismiss(&id)?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectWinnerInput {
    pub instance_id: String,
}

/// Crown a winner: records the exchange, surfaces the handoff URL, and the
/// arena resets itself shortly after regardless of how the protocol went.
async fn select_winner(
    State(state): State<ApiState>,
    Json(input): Json<SelectWinnerInput>,
) -> Result<Json<ArbitrationReport>, ApiError> {
    Ok(Json(state.arena.crown(&input.instance_id).await?))
}

/// Render model for the whole arena.
async fn arena_view(State(state): State<ApiState>) -> Json<ArenaView> {
    Json(state.arena.views())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::{Dispatch, DispatchOutcome, StoredWinnerLog};
    use crate::providers::credentials::StoredKeyResolver;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    struct StubDispatch;

    #[async_trait]
    impl Dispatch for StubDispatch {
        async fn dispatch(
            &self,
            _instance: &AiInstance,
            _prompt: &str,
            _credential: Option<&str>,
        ) -> DispatchOutcome {
            DispatchOutcome::Success("stub reply".to_string())
        }
    }

    fn test_app() -> Router {
        let pool = crate::db::memory_pool();
        let resolver = StoredKeyResolver::new(pool.clone());
        let arena = Arena::with_reload_delay(
            pool.clone(),
            Arc::new(StubDispatch),
            resolver.clone(),
            StoredWinnerLog::new(pool.clone()),
            Duration::from_millis(10),
        );
        let registry = ProviderRegistry::new(pool.clone(), resolver);
        router(ApiState {
            db: pool,
            arena,
            registry,
        })
    }

    async fn send_json(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(value) => builder
                .header("content-type", "application/json")
                .body(Body::from(value.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let app = test_app();
        let (status, body) = send_json(&app, "GET", "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn catalog_lookup_returns_normalised_models() {
        let app = test_app();
        let (status, body) = send_json(
            &app,
            "POST",
            "/api/models/provider",
            Some(json!({ "provider": "openai" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let models = body["models"].as_array().unwrap();
        assert!(models.iter().any(|m| m["name"] == "gpt-4o"));

        let (_, empty) = send_json(
            &app,
            "POST",
            "/api/models/provider",
            Some(json!({ "provider": "nope" })),
        )
        .await;
        assert!(empty["models"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn credential_save_and_fetch_round_trip() {
        let app = test_app();
        let (status, body) = send_json(
            &app,
            "POST",
            "/api/keys/save",
            Some(json!({ "provider": "claude", "apiKey": "sk-ant-1" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (_, fetched) = send_json(
            &app,
            "POST",
            "/api/keys/get",
            Some(json!({ "provider": "claude" })),
        )
        .await;
        assert_eq!(fetched["apiKey"], "sk-ant-1");

        let (_, missing) = send_json(
            &app,
            "POST",
            "/api/keys/get",
            Some(json!({ "provider": "openai" })),
        )
        .await;
        assert_eq!(missing["apiKey"], Value::Null);
    }

    #[tokio::test]
    async fn unknown_provider_registration_is_rejected() {
        let app = test_app();
        let (status, body) = send_json(
            &app,
            "POST",
            "/api/instances",
            Some(json!({ "provider": "nope", "model": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "PRV-1001");
    }

    #[tokio::test]
    async fn broadcast_flow_ends_in_a_handoff_and_a_reset() {
        let app = test_app();

        // model arrives as a bare string; the boundary normalises it
        let (status, instance) = send_json(
            &app,
            "POST",
            "/api/instances",
            Some(json!({
                "provider": "openai",
                "model": "gpt-4o",
                "destinationUrl": "https://chat.example.com/continue",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let id = instance["id"].as_str().unwrap().to_string();

        send_json(&app, "POST", "/api/prompt", Some(json!({ "text": "hello" }))).await;
        let (_, report) = send_json(&app, "POST", "/api/prompt/send", None).await;
        assert_eq!(report["accepted"], true);
        assert_eq!(report["dispatched"], 1);

        let mut crowned = None;
        for _ in 0..100 {
            let (_, view) = send_json(&app, "GET", "/api/arena", None).await;
            let sessions = view["sessions"].as_array().unwrap();
            if sessions.iter().any(|s| s["showVerdict"] == true) {
                let (status, outcome) = send_json(
                    &app,
                    "POST",
                    "/api/select-winner",
                    Some(json!({ "instanceId": id })),
                )
                .await;
                assert_eq!(status, StatusCode::OK);
                crowned = Some(outcome);
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let outcome = crowned.expect("session never produced an outcome");
        let url = outcome["handoffUrl"].as_str().unwrap();
        assert!(url.contains("prompt=Prompt%3Ahello"));
        assert!(url.contains("reply=Reply%3Astub+reply"));

        for _ in 0..100 {
            let (_, view) = send_json(&app, "GET", "/api/arena", None).await;
            if view["trigger"] == 0 && view["started"] == false {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("arena never returned to its initial state");
    }
}
