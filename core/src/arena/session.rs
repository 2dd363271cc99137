//! One conversational session per configured instance.
//!
//! The controller owns the session's phase, prompt, outcome fields, and the
//! cached credential. The broadcast coordinator may only write the prompt
//! and request phase transitions; outcome fields are written exclusively by
//! the controller when a tagged dispatch completion is applied. Every
//! transition guard lives here so the invariants hold no matter which
//! surface drives the session:
//! - at most one of response/error is non-empty at any time;
//! - phases only move forward, except the trigger-driven reset back to
//!   `AwaitingDispatch`;
//! - a completion tagged with an old trigger, or addressed to a dismissed
//!   session, is discarded without touching state.

use serde::Serialize;

use super::dispatch::DispatchOutcome;
use crate::providers::registry::AiInstance;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    AwaitingDispatch,
    InFlight,
    Responded,
    Failed,
    Arbitrated,
}

#[derive(Debug, Clone)]
pub struct SessionController {
    instance: AiInstance,
    phase: SessionPhase,
    prompt_text: String,
    response_text: String,
    error_message: String,
    dismissed: bool,
    has_outcome: bool,
    current_trigger: u64,
    credential: Option<String>,
}

impl SessionController {
    pub fn new(instance: AiInstance) -> Self {
        Self {
            instance,
            phase: SessionPhase::Idle,
            prompt_text: String::new(),
            response_text: String::new(),
            error_message: String::new(),
            dismissed: false,
            has_outcome: false,
            current_trigger: 0,
            credential: None,
        }
    }

    pub fn instance(&self) -> &AiInstance {
        &self.instance
    }

    /// Metadata edit through the settings surface; session state survives.
    pub fn set_instance(&mut self, instance: AiInstance) {
        self.instance = instance;
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn prompt_text(&self) -> &str {
        &self.prompt_text
    }

    pub fn response_text(&self) -> &str {
        &self.response_text
    }

    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    pub fn is_dismissed(&self) -> bool {
        self.dismissed
    }

    pub fn current_trigger(&self) -> u64 {
        self.current_trigger
    }

    pub fn credential(&self) -> Option<&str> {
        self.credential.as_deref()
    }

    /// Cache a successfully resolved credential for the rest of this
    /// controller's lifetime. While unresolved, every dispatch retries.
    pub fn cache_credential(&mut self, secret: String) {
        self.credential = Some(secret);
    }

    /// Broadcast write: prompt only, never phase.
    pub fn set_prompt(&mut self, text: &str) {
        self.prompt_text = text.to_string();
    }

    /// React to a trigger increase: reset to `AwaitingDispatch`, clearing
    /// any prior outcome. Dismissed sessions ignore triggers. Returns true
    /// when a dispatch should be issued for this session.
    pub fn observe_trigger(&mut self, trigger: u64) -> bool {
        if self.dismissed || trigger <= self.current_trigger {
            return false;
        }
        self.current_trigger = trigger;
        self.phase = SessionPhase::AwaitingDispatch;
        self.clear_outcome();
        true
    }

    /// Local send from the session's own input, allowed only while the
    /// session has never produced an outcome. Dispatches under the current
    /// trigger value without incrementing it.
    pub fn request_local_dispatch(&mut self) -> bool {
        if self.dismissed || self.has_outcome || self.prompt_text.trim().is_empty() {
            return false;
        }
        if !matches!(self.phase, SessionPhase::Idle | SessionPhase::AwaitingDispatch) {
            return false;
        }
        self.phase = SessionPhase::AwaitingDispatch;
        self.clear_outcome();
        true
    }

    /// `AwaitingDispatch -> InFlight`, guarded by the trigger tag the
    /// dispatch was issued under.
    pub fn begin_dispatch(&mut self, trigger: u64) -> bool {
        if self.dismissed
            || trigger != self.current_trigger
            || self.phase != SessionPhase::AwaitingDispatch
        {
            return false;
        }
        self.phase = SessionPhase::InFlight;
        self.clear_outcome();
        true
    }

    /// Apply a tagged completion. Returns false when the completion was
    /// stale or the session is no longer receptive; state is untouched in
    /// that case.
    pub fn apply_outcome(&mut self, trigger: u64, outcome: &DispatchOutcome) -> bool {
        if self.dismissed
            || trigger != self.current_trigger
            || self.phase != SessionPhase::InFlight
        {
            return false;
        }
        match outcome {
            DispatchOutcome::Success(text) | DispatchOutcome::SoftFailure(text) => {
                self.set_response(text);
                self.phase = SessionPhase::Responded;
            }
            DispatchOutcome::HardFailure(message) => {
                self.set_error(message);
                self.phase = SessionPhase::Failed;
            }
        }
        self.has_outcome = true;
        true
    }

    /// Dismiss protocol: only an outcome-bearing session can be dismissed.
    pub fn dismiss(&mut self) -> bool {
        if !matches!(self.phase, SessionPhase::Responded | SessionPhase::Failed) {
            return false;
        }
        self.dismissed = true;
        self.phase = SessionPhase::Arbitrated;
        true
    }

    /// Crown protocol entry: only an outcome-bearing session can win.
    pub fn mark_arbitrated(&mut self) -> bool {
        if !matches!(self.phase, SessionPhase::Responded | SessionPhase::Failed) {
            return false;
        }
        self.phase = SessionPhase::Arbitrated;
        true
    }

    /// The text a winner carries forward: the reply when one exists,
    /// otherwise the error message of a crowned failure.
    pub fn outcome_text(&self) -> &str {
        if !self.response_text.is_empty() {
            &self.response_text
        } else {
            &self.error_message
        }
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            instance_id: self.instance.id.clone(),
            display_name: self.instance.display_name.clone(),
            icon_ref: self.instance.icon_ref.clone(),
            phase: self.phase,
            prompt: self.prompt_text.clone(),
            reply: non_empty(&self.response_text),
            error: non_empty(&self.error_message),
            thinking: self.phase == SessionPhase::InFlight,
            show_input: !self.has_outcome,
            show_verdict: matches!(self.phase, SessionPhase::Responded | SessionPhase::Failed),
            error_flagged: self.phase == SessionPhase::Failed,
        }
    }

    fn clear_outcome(&mut self) {
        self.response_text.clear();
        self.error_message.clear();
    }

    fn set_response(&mut self, text: &str) {
        self.error_message.clear();
        self.response_text = text.to_string();
    }

    fn set_error(&mut self, message: &str) {
        self.response_text.clear();
        self.error_message = message.to_string();
    }
}

/// Render model for one session. Every visibility rule here is a function of
/// the controller state, so the UI never derives state from what it drew.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub instance_id: String,
    pub display_name: String,
    pub icon_ref: Option<String>,
    pub phase: SessionPhase,
    pub prompt: String,
    pub reply: Option<String>,
    pub error: Option<String>,
    pub thinking: bool,
    pub show_input: bool,
    pub show_verdict: bool,
    pub error_flagged: bool,
}

fn non_empty(text: &str) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> SessionController {
        SessionController::new(AiInstance {
            id: "openai-gpt-4o-1".to_string(),
            provider_key: "openai".to_string(),
            model: "gpt-4o".to_string(),
            display_name: "gpt-4o".to_string(),
            icon_ref: None,
            destination_url: None,
        })
    }

    fn to_responded(session: &mut SessionController, trigger: u64, reply: &str) {
        assert!(session.observe_trigger(trigger));
        assert!(session.begin_dispatch(trigger));
        assert!(session.apply_outcome(trigger, &DispatchOutcome::Success(reply.to_string())));
    }

    #[test]
    fn happy_path_walks_through_the_phases() {
        let mut session = controller();
        session.set_prompt("hello");
        assert_eq!(session.phase(), SessionPhase::Idle);

        assert!(session.observe_trigger(1));
        assert_eq!(session.phase(), SessionPhase::AwaitingDispatch);
        assert!(session.begin_dispatch(1));
        assert_eq!(session.phase(), SessionPhase::InFlight);
        assert!(session.apply_outcome(1, &DispatchOutcome::Success("hi".to_string())));
        assert_eq!(session.phase(), SessionPhase::Responded);
        assert_eq!(session.response_text(), "hi");
        assert!(session.error_message().is_empty());
    }

    #[test]
    fn stale_trigger_completion_is_discarded() {
        let mut session = controller();
        session.set_prompt("hello");
        assert!(session.observe_trigger(1));
        assert!(session.begin_dispatch(1));

        // a newer broadcast supersedes the in-flight dispatch
        assert!(session.observe_trigger(2));
        assert!(!session.apply_outcome(1, &DispatchOutcome::Success("old".to_string())));
        assert!(session.response_text().is_empty());

        assert!(session.begin_dispatch(2));
        assert!(session.apply_outcome(2, &DispatchOutcome::Success("new".to_string())));
        assert_eq!(session.response_text(), "new");
    }

    #[test]
    fn outcome_fields_are_mutually_exclusive() {
        let mut session = controller();
        session.set_prompt("hello");
        to_responded(&mut session, 1, "hi");

        assert!(session.observe_trigger(2));
        assert!(session.begin_dispatch(2));
        assert!(session.apply_outcome(2, &DispatchOutcome::HardFailure("down".to_string())));
        assert_eq!(session.phase(), SessionPhase::Failed);
        assert_eq!(session.error_message(), "down");
        assert!(session.response_text().is_empty());
    }

    #[test]
    fn soft_failure_is_a_reply_not_an_error() {
        let mut session = controller();
        session.set_prompt("hello");
        assert!(session.observe_trigger(1));
        assert!(session.begin_dispatch(1));
        assert!(session.apply_outcome(
            1,
            &DispatchOutcome::SoftFailure("No reply received.".to_string())
        ));
        assert_eq!(session.phase(), SessionPhase::Responded);
        assert_eq!(session.response_text(), "No reply received.");
        assert!(!session.view().error_flagged);
    }

    #[test]
    fn trigger_reset_clears_outcome_but_keeps_input_retired() {
        let mut session = controller();
        session.set_prompt("hello");
        to_responded(&mut session, 1, "hi");
        assert!(!session.view().show_input);

        assert!(session.observe_trigger(2));
        assert_eq!(session.phase(), SessionPhase::AwaitingDispatch);
        assert!(session.response_text().is_empty());
        // the free-text input never comes back once an outcome was produced
        assert!(!session.view().show_input);
    }

    #[test]
    fn dismissed_session_ignores_triggers_and_late_completions() {
        let mut session = controller();
        session.set_prompt("hello");
        to_responded(&mut session, 1, "hi");
        assert!(session.dismiss());
        assert!(session.is_dismissed());
        assert_eq!(session.phase(), SessionPhase::Arbitrated);

        assert!(!session.observe_trigger(2));
        assert!(!session.apply_outcome(1, &DispatchOutcome::Success("late".to_string())));
        assert_eq!(session.response_text(), "hi");
    }

    #[test]
    fn arbitration_requires_an_outcome() {
        let mut session = controller();
        session.set_prompt("hello");
        assert!(!session.mark_arbitrated());
        assert!(!session.dismiss());

        to_responded(&mut session, 1, "hi");
        assert!(session.mark_arbitrated());
        assert_eq!(session.phase(), SessionPhase::Arbitrated);
    }

    #[test]
    fn local_dispatch_only_before_any_outcome() {
        let mut session = controller();
        assert!(!session.request_local_dispatch());

        session.set_prompt("hello");
        assert!(session.request_local_dispatch());
        assert_eq!(session.phase(), SessionPhase::AwaitingDispatch);
        assert!(session.begin_dispatch(0));
        assert!(session.apply_outcome(0, &DispatchOutcome::Success("hi".to_string())));

        assert!(!session.request_local_dispatch());
    }

    #[test]
    fn view_is_derived_from_phase() {
        let mut session = controller();
        session.set_prompt("hello");
        assert!(session.observe_trigger(1));
        assert!(session.begin_dispatch(1));
        let view = session.view();
        assert!(view.thinking);
        assert!(!view.show_verdict);

        assert!(session.apply_outcome(1, &DispatchOutcome::HardFailure("down".to_string())));
        let view = session.view();
        assert!(!view.thinking);
        assert!(view.show_verdict);
        assert!(view.error_flagged);
        assert_eq!(view.error.as_deref(), Some("down"));
        assert_eq!(view.reply, None);
    }
}
