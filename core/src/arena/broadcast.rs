//! The broadcast coordinator: one master prompt fanned out to every
//! configured session.
//!
//! All arena state sits behind a single mutex and every critical section is
//! short and synchronous, so the orchestrator never suspends while holding
//! it. A send increments the trigger counter and resets every non-dismissed
//! session under that one lock, which is what guarantees all sessions
//! observe the same trigger and prompt before any dispatch is issued.
//! Dispatches then run as independent tasks; each completion is applied
//! back through the lock, tagged with the trigger it was issued under so a
//! stale result can never clobber a newer round.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::Result;
use rusqlite::params;
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use super::arbitration::{self, ArbitrationReport, WinnerLog};
use super::dispatch::{Dispatch, DispatchOutcome};
use super::session::{SessionController, SessionPhase, SessionView};
use crate::db::DbPool;
use crate::errors::ArenaError;
use crate::logging::log_event;
use crate::providers::credentials::KeyResolver;
use crate::providers::registry::AiInstance;

/// Delay between arbitration and the automatic return to a clean arena.
pub const RELOAD_DELAY: Duration = Duration::from_millis(500);

/// Result of a broadcast send request.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReport {
    pub accepted: bool,
    pub trigger: u64,
    pub dispatched: usize,
}

/// Render model for the whole arena.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArenaView {
    pub started: bool,
    pub trigger: u64,
    pub master_prompt: String,
    pub master_input_visible: bool,
    pub sessions: Vec<SessionView>,
}

struct DispatchJob {
    instance: AiInstance,
    prompt: String,
    trigger: u64,
}

struct ArenaState {
    master_prompt: String,
    started: bool,
    trigger: u64,
    sessions: Vec<SessionController>,
}

pub struct Arena {
    state: Mutex<ArenaState>,
    dispatcher: Arc<dyn Dispatch>,
    resolver: Arc<dyn KeyResolver>,
    winner_log: Arc<dyn WinnerLog>,
    pool: DbPool,
    reload_delay: Duration,
}

impl Arena {
    pub fn new(
        pool: DbPool,
        dispatcher: Arc<dyn Dispatch>,
        resolver: Arc<dyn KeyResolver>,
        winner_log: Arc<dyn WinnerLog>,
    ) -> Arc<Self> {
        Self::with_reload_delay(pool, dispatcher, resolver, winner_log, RELOAD_DELAY)
    }

    pub fn with_reload_delay(
        pool: DbPool,
        dispatcher: Arc<dyn Dispatch>,
        resolver: Arc<dyn KeyResolver>,
        winner_log: Arc<dyn WinnerLog>,
        reload_delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ArenaState {
                master_prompt: String::new(),
                started: false,
                trigger: 0,
                sessions: Vec::new(),
            }),
            dispatcher,
            resolver,
            winner_log,
            pool,
            reload_delay,
        })
    }

    /// Replace the session set from the persisted registry, in order.
    pub fn load_instances(&self, instances: Vec<AiInstance>) {
        let mut state = self.state();
        state.sessions = instances.into_iter().map(SessionController::new).collect();
        let prompt = state.master_prompt.clone();
        for session in state.sessions.iter_mut() {
            session.set_prompt(&prompt);
        }
    }

    /// Register one instance: a new session joins the grid, an existing one
    /// keeps its state and picks up the edited metadata.
    pub fn add_instance(&self, instance: AiInstance) {
        let mut state = self.state();
        if let Some(session) = state
            .sessions
            .iter_mut()
            .find(|s| s.instance().id == instance.id)
        {
            session.set_instance(instance);
            return;
        }
        let mut session = SessionController::new(instance);
        session.set_prompt(&state.master_prompt.clone());
        state.sessions.push(session);
    }

    /// Master prompt edit: mirrored into every session without any phase
    /// change. The first non-empty edit starts the conversation, which is
    /// what reveals the session grid.
    pub fn prompt_edited(&self, text: &str) -> bool {
        let mut state = self.state();
        state.master_prompt = text.to_string();
        for session in state.sessions.iter_mut() {
            session.set_prompt(text);
        }
        if !text.trim().is_empty() && !state.started {
            state.started = true;
        }
        state.started
    }

    /// Local override of one session's prompt.
    pub fn session_prompt_edited(&self, instance_id: &str, text: &str) -> Result<()> {
        let mut state = self.state();
        let session = find_session(&mut state, instance_id)?;
        session.set_prompt(text);
        Ok(())
    }

    /// Explicit send action: increments the trigger and re-dispatches every
    /// non-dismissed session. A blank master prompt is a complete no-op.
    /// Repeated identical sends still increment and re-dispatch; there is
    /// no content-based deduplication.
    pub async fn send_requested(self: &Arc<Self>) -> SendReport {
        let (trigger, jobs) = {
            let mut state = self.state();
            if state.master_prompt.trim().is_empty() {
                return SendReport {
                    accepted: false,
                    trigger: state.trigger,
                    dispatched: 0,
                };
            }
            state.trigger += 1;
            let trigger = state.trigger;
            let mut jobs = Vec::new();
            for session in state.sessions.iter_mut() {
                if session.observe_trigger(trigger) {
                    jobs.push(DispatchJob {
                        instance: session.instance().clone(),
                        prompt: session.prompt_text().to_string(),
                        trigger,
                    });
                }
            }
            (trigger, jobs)
        };

        let dispatched = jobs.len();
        for job in jobs {
            let arena = Arc::clone(self);
            tokio::spawn(async move {
                arena.run_dispatch(job).await;
            });
        }
        log_broadcast(&self.pool, trigger, dispatched);
        SendReport {
            accepted: true,
            trigger,
            dispatched,
        }
    }

    /// Single-session send from that session's own input.
    pub async fn send_one(self: &Arc<Self>, instance_id: &str) -> Result<bool> {
        let job = {
            let mut state = self.state();
            let session = find_session(&mut state, instance_id)?;
            if !session.request_local_dispatch() {
                return Ok(false);
            }
            DispatchJob {
                instance: session.instance().clone(),
                prompt: session.prompt_text().to_string(),
                trigger: session.current_trigger(),
            }
        };
        let arena = Arc::clone(self);
        tokio::spawn(async move {
            arena.run_dispatch(job).await;
        });
        Ok(true)
    }

    /// Dismiss protocol: hides the session; any outstanding call keeps
    /// running and its late result is discarded by the trigger tag rule.
    pub fn dismiss(&self, instance_id: &str) -> Result<()> {
        let mut state = self.state();
        let session = find_session(&mut state, instance_id)?;
        if !session.dismiss() {
            return Err(ArenaError::NotArbitrable.into());
        }
        Ok(())
    }

    /// Winner protocol. Steps 2-4 are best effort; the arena reset in step
    /// 5 is scheduled no matter how they went.
    pub async fn crown(self: &Arc<Self>, instance_id: &str) -> Result<ArbitrationReport> {
        let (record, destination) = {
            let mut state = self.state();
            let session = find_session(&mut state, instance_id)?;
            if !matches!(
                session.phase(),
                SessionPhase::Responded | SessionPhase::Failed
            ) {
                return Err(ArenaError::NotArbitrable.into());
            }
            let record = arbitration::winner_record(
                &session.instance().id,
                session.prompt_text(),
                session.outcome_text(),
            );
            let destination = session.instance().destination_url.clone();
            session.mark_arbitrated();
            (record, destination)
        };

        let report = arbitration::execute(
            &self.winner_log,
            &self.pool,
            &record,
            destination.as_deref(),
        )
        .await;
        self.schedule_reset();
        Ok(report)
    }

    /// Return the arena to its clean initial state: fresh sessions for the
    /// same instances, empty prompt, trigger back at zero.
    pub fn reset(&self) {
        let mut state = self.state();
        let instances: Vec<AiInstance> = state
            .sessions
            .iter()
            .map(|s| s.instance().clone())
            .collect();
        state.master_prompt.clear();
        state.started = false;
        state.trigger = 0;
        state.sessions = instances.into_iter().map(SessionController::new).collect();
    }

    /// Render model: dismissed sessions are gone from the visible set.
    pub fn views(&self) -> ArenaView {
        let state = self.state();
        let sessions: Vec<SessionView> = state
            .sessions
            .iter()
            .filter(|s| !s.is_dismissed())
            .map(|s| s.view())
            .collect();
        ArenaView {
            started: state.started,
            trigger: state.trigger,
            master_prompt: state.master_prompt.clone(),
            master_input_visible: !(state.trigger > 0 && !state.sessions.is_empty()),
            sessions,
        }
    }

    async fn run_dispatch(&self, job: DispatchJob) {
        // Credential resolution is one of the two suspension points; the
        // resolved value is cached for the controller's lifetime.
        let cached = {
            let mut state = self.state();
            match find_session(&mut state, &job.instance.id) {
                Ok(session) => session.credential().map(str::to_string),
                Err(_) => return,
            }
        };
        let credential = match cached {
            Some(secret) => Some(secret),
            None => match self.resolver.resolve(&job.instance.provider_key).await {
                Ok(Some(secret)) => {
                    let mut state = self.state();
                    if let Ok(session) = find_session(&mut state, &job.instance.id) {
                        session.cache_credential(secret.clone());
                    }
                    Some(secret)
                }
                Ok(None) => None,
                Err(err) => {
                    tracing::warn!(
                        provider = %job.instance.provider_key,
                        error = %err,
                        "credential resolution failed; dispatching without one"
                    );
                    None
                }
            },
        };

        {
            let mut state = self.state();
            match find_session(&mut state, &job.instance.id) {
                Ok(session) => {
                    if !session.begin_dispatch(job.trigger) {
                        return;
                    }
                }
                Err(_) => return,
            }
        }

        let started_at = Instant::now();
        let outcome = self
            .dispatcher
            .dispatch(&job.instance, &job.prompt, credential.as_deref())
            .await;
        let elapsed_ms = started_at.elapsed().as_millis() as i64;

        let applied = {
            let mut state = self.state();
            match find_session(&mut state, &job.instance.id) {
                Ok(session) => session.apply_outcome(job.trigger, &outcome),
                Err(_) => false,
            }
        };

        if applied {
            record_history(&self.pool, &job, &outcome, elapsed_ms);
            log_dispatch(&self.pool, &job.instance.id, &outcome, elapsed_ms);
        } else {
            tracing::debug!(
                instance = %job.instance.id,
                trigger = job.trigger,
                "discarded stale dispatch completion"
            );
        }
    }

    fn schedule_reset(self: &Arc<Self>) {
        let arena = Arc::clone(self);
        let delay = self.reload_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            arena.reset();
        });
    }

    fn state(&self) -> MutexGuard<'_, ArenaState> {
        self.state.lock().expect("arena state lock poisoned")
    }
}

fn find_session<'a>(
    state: &'a mut ArenaState,
    instance_id: &str,
) -> Result<&'a mut SessionController> {
    state
        .sessions
        .iter_mut()
        .find(|s| s.instance().id == instance_id)
        .ok_or_else(|| ArenaError::InstanceNotFound.into())
}

fn log_broadcast(pool: &DbPool, trigger: u64, dispatched: usize) {
    let pool = pool.clone();
    tokio::spawn(async move {
        if let Ok(conn) = pool.get() {
            let _ = log_event(
                &conn,
                "info",
                Some("BRD-0100"),
                "arena.broadcast",
                "Master prompt broadcast",
                Some("Every non-dismissed session was re-dispatched"),
                Some(serde_json::json!({
                    "trigger": trigger,
                    "dispatched": dispatched,
                })),
            );
        }
    });
}

fn log_dispatch(pool: &DbPool, instance_id: &str, outcome: &DispatchOutcome, elapsed_ms: i64) {
    let (level, code, message) = match outcome {
        DispatchOutcome::HardFailure(_) => {
            ("warn", "DSP-0201", "Dispatch failed")
        }
        _ => ("info", "DSP-0200", "Dispatch completed"),
    };
    let preview = outcome.text().chars().take(200).collect::<String>();
    let kind = outcome.kind();
    let pool = pool.clone();
    let instance_id = instance_id.to_string();
    tokio::spawn(async move {
        if let Ok(conn) = pool.get() {
            let _ = log_event(
                &conn,
                level,
                Some(code),
                "arena.dispatch",
                message,
                Some("Outcome applied to the owning session"),
                Some(serde_json::json!({
                    "instance": instance_id,
                    "kind": kind,
                    "elapsed_ms": elapsed_ms,
                    "preview": preview,
                })),
            );
        }
    });
}

fn record_history(pool: &DbPool, job: &DispatchJob, outcome: &DispatchOutcome, elapsed_ms: i64) {
    let pool = pool.clone();
    let instance_id = job.instance.id.clone();
    let prompt = job.prompt.clone();
    let kind = outcome.kind();
    let body = outcome.text().to_string();
    tokio::spawn(async move {
        if let Ok(conn) = pool.get() {
            let now = OffsetDateTime::now_utc().unix_timestamp();
            let _ = conn.execute(
                "INSERT INTO dispatch_history (id, instance_id, prompt, outcome, body, response_time_ms, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    Uuid::new_v4().to_string(),
                    instance_id,
                    prompt,
                    kind,
                    body,
                    elapsed_ms,
                    now,
                ],
            );
        }
    });
}
