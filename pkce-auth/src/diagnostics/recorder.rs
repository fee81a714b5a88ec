//! Per-flow timeline recorder for troubleshooting failed sign-ins.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;
use uuid::Uuid;

use super::{names, FlowEvent, FlowObserver, Phase, SecretField};

/// How a recorded flow ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalState {
    Pending,
    Success,
    Failure,
}

/// A single entry on a session's timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseEvent {
    pub timestamp: DateTime<Utc>,
    /// Milliseconds since the session started.
    pub elapsed_ms: i64,
    pub name: String,
    pub phase: Phase,
    pub success: bool,
    pub metadata: BTreeMap<String, Value>,
    pub error: Option<String>,
}

/// Diagnostic record of one initiate-to-completion cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthSession {
    pub session_id: String,
    pub provider: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub events: Vec<PhaseEvent>,
    pub final_state: FinalState,
    pub error_count: u32,
}

impl OAuthSession {
    fn new(session_id: String, provider: &str) -> Self {
        Self {
            session_id,
            provider: provider.to_string(),
            start_time: Utc::now(),
            end_time: None,
            events: Vec::new(),
            final_state: FinalState::Pending,
            error_count: 0,
        }
    }

    fn is_open(&self) -> bool {
        self.final_state == FinalState::Pending
    }
}

#[derive(Default)]
struct State {
    sessions: BTreeMap<String, OAuthSession>,
    /// Most recent still-pending session per provider.
    open: HashMap<String, String>,
    /// Flow ids first seen after their session was opened under another id.
    aliases: HashMap<String, String>,
}

/// Append-only recorder of flow sessions.
///
/// Secret fields are reduced to presence and length. Raw values are kept only when
/// raw capture is requested *and* the crate was built with debug assertions.
///
/// Once a session is closed, further events carrying its flow id are dropped.
/// Closed sessions stay in memory until [`clear`](Self::clear), so a long-lived
/// process should export and clear periodically.
#[derive(Default)]
pub struct Recorder {
    state: Mutex<State>,
    capture_raw: bool,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request raw secret capture. Ignored in release builds.
    pub fn with_raw_capture(mut self, capture_raw: bool) -> Self {
        self.capture_raw = capture_raw;
        self
    }

    /// True when raw secret values are being written to timelines.
    pub fn captures_raw(&self) -> bool {
        self.capture_raw && cfg!(debug_assertions)
    }

    /// Append an event to the session `session_id`, creating the session if needed.
    pub fn log_event(
        &self,
        session_id: &str,
        name: &str,
        phase: Phase,
        success: bool,
        metadata: BTreeMap<String, Value>,
        error: Option<String>,
    ) {
        let mut state = self.lock();
        let session = state
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| OAuthSession::new(session_id.to_string(), ""));
        Self::append(session, name, phase, success, metadata, error);
    }

    /// Serializable copy of one session's timeline.
    ///
    /// Accepts either the session id or a flow id that was later attached to it.
    pub fn export_session(&self, session_id: &str) -> Option<OAuthSession> {
        let state = self.lock();
        Self::resolve(&state, session_id).and_then(|id| state.sessions.get(&id).cloned())
    }

    /// One session's timeline as pretty JSON.
    pub fn export_json(&self, session_id: &str) -> Option<String> {
        self.export_session(session_id)
            .and_then(|session| serde_json::to_string_pretty(&session).ok())
    }

    /// All sessions, oldest first.
    pub fn sessions(&self) -> Vec<OAuthSession> {
        let mut sessions: Vec<_> = self.lock().sessions.values().cloned().collect();
        sessions.sort_by_key(|s| s.start_time);
        sessions
    }

    /// Id of the pending session for `provider`, if any.
    pub fn open_session(&self, provider: &str) -> Option<String> {
        self.lock().open.get(provider).cloned()
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.sessions.clear();
        state.open.clear();
        state.aliases.clear();
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // Poisoned state is still readable; recover it.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn append(
        session: &mut OAuthSession,
        name: &str,
        phase: Phase,
        success: bool,
        metadata: BTreeMap<String, Value>,
        error: Option<String>,
    ) {
        let now = Utc::now();
        if !success {
            session.error_count += 1;
        }
        session.events.push(PhaseEvent {
            timestamp: now,
            elapsed_ms: (now - session.start_time).num_milliseconds(),
            name: name.to_string(),
            phase,
            success,
            metadata,
            error,
        });
    }

    fn redact(&self, secrets: &[SecretField], metadata: &mut BTreeMap<String, Value>) {
        let capture_raw = self.captures_raw();
        for field in secrets {
            let value = field.value.as_ref().map(|v| v.expose_secret().as_str());
            metadata.insert(format!("{}_present", field.name), value.is_some().into());
            metadata.insert(
                format!("{}_length", field.name),
                value.map(|v| v.len()).unwrap_or(0).into(),
            );
            if capture_raw {
                if let Some(raw) = value {
                    metadata.insert(format!("{}_raw", field.name), raw.into());
                }
            }
        }
    }

    /// Pick the session an event belongs to, opening one when none fits.
    fn route(state: &mut State, event: &FlowEvent) -> String {
        if event.name == names::FLOW_STARTED {
            let id = event
                .flow_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            // A restart abandons whatever was pending for this provider.
            if let Some(previous) = state.open.remove(&event.provider) {
                if let Some(session) = state.sessions.get_mut(&previous) {
                    session.final_state = FinalState::Failure;
                    session.end_time = Some(Utc::now());
                }
            }
            state
                .sessions
                .insert(id.clone(), OAuthSession::new(id.clone(), &event.provider));
            state.open.insert(event.provider.clone(), id.clone());
            return id;
        }

        if let Some(flow_id) = &event.flow_id {
            if let Some(id) = Self::resolve(state, flow_id) {
                return id;
            }
        }
        if let Some(id) = state.open.get(&event.provider).cloned() {
            if let Some(flow_id) = &event.flow_id {
                state.aliases.insert(flow_id.clone(), id.clone());
            }
            return id;
        }

        // Callback leg in a fresh process: nothing recorded the first leg.
        let id = event
            .flow_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        state
            .sessions
            .insert(id.clone(), OAuthSession::new(id.clone(), &event.provider));
        state.open.insert(event.provider.clone(), id.clone());
        id
    }

    fn resolve(state: &State, id: &str) -> Option<String> {
        if state.sessions.contains_key(id) {
            return Some(id.to_string());
        }
        state.aliases.get(id).cloned()
    }
}

impl FlowObserver for Recorder {
    fn on_event(&self, event: &FlowEvent) {
        let mut metadata = event.metadata.clone();
        self.redact(&event.secrets, &mut metadata);
        metadata.insert("provider".to_string(), event.provider.clone().into());

        let mut state = self.lock();
        let id = Self::route(&mut state, event);
        if state.sessions.get(&id).is_some_and(|s| !s.is_open()) {
            trace!("Dropped {} for closed session {}", event.name, id);
            return;
        }
        let closes = matches!(event.name, names::FLOW_COMPLETED | names::FLOW_FAILED);

        if let Some(session) = state.sessions.get_mut(&id) {
            if session.provider.is_empty() {
                session.provider = event.provider.clone();
            }
            Self::append(
                session,
                event.name,
                event.phase,
                event.success,
                metadata,
                event.error.clone(),
            );
            if closes && session.is_open() {
                session.final_state = if event.name == names::FLOW_COMPLETED {
                    FinalState::Success
                } else {
                    FinalState::Failure
                };
                session.end_time = Some(Utc::now());
            }
        }
        if closes {
            state.open.remove(&event.provider);
        }
        trace!("Recorded {} for session {}", event.name, id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(flow_id: &str) -> FlowEvent {
        FlowEvent::new(names::FLOW_STARTED, Phase::Initiate, "google").flow(Some(flow_id))
    }

    #[test]
    fn test_secrets_are_reduced_to_length_and_presence() {
        let recorder = Recorder::new();
        recorder.on_event(&started("flow-1"));
        recorder.on_event(
            &FlowEvent::new(names::PARAMETERS_GENERATED, Phase::Storage, "google")
                .flow(Some("flow-1"))
                .secret("code_verifier", Some("verifier-value-123"))
                .secret("refresh_token", None),
        );

        let session = recorder.export_session("flow-1").unwrap();
        let meta = &session.events[1].metadata;
        assert_eq!(meta["code_verifier_present"], Value::Bool(true));
        assert_eq!(meta["code_verifier_length"], Value::from(18));
        assert_eq!(meta["refresh_token_present"], Value::Bool(false));
        assert!(!meta.contains_key("code_verifier_raw"));

        let json = recorder.export_json("flow-1").unwrap();
        assert!(!json.contains("verifier-value-123"));
    }

    #[test]
    fn test_raw_capture_only_in_debug_builds() {
        let recorder = Recorder::new().with_raw_capture(true);
        recorder.on_event(
            &started("flow-1").secret("code_challenge", Some("challenge-value")),
        );
        let session = recorder.export_session("flow-1").unwrap();
        assert_eq!(
            session.events[0].metadata.contains_key("code_challenge_raw"),
            cfg!(debug_assertions)
        );
    }

    #[test]
    fn test_session_lifecycle_and_error_count() {
        let recorder = Recorder::new();
        recorder.on_event(&started("flow-1"));
        recorder.on_event(
            &FlowEvent::new(names::STRATEGY_ATTEMPTED, Phase::Exchange, "google")
                .flow(Some("flow-1"))
                .failed("HTTP 400"),
        );
        recorder.on_event(
            &FlowEvent::new(names::FLOW_COMPLETED, Phase::Session, "google").flow(Some("flow-1")),
        );

        let session = recorder.export_session("flow-1").unwrap();
        assert_eq!(session.final_state, FinalState::Success);
        assert_eq!(session.error_count, 1);
        assert_eq!(session.events.len(), 3);
        assert!(session.end_time.is_some());
        assert!(recorder.open_session("google").is_none());
    }

    #[test]
    fn test_events_after_close_are_dropped() {
        let recorder = Recorder::new();
        recorder.on_event(&started("flow-1"));
        recorder.on_event(
            &FlowEvent::new(names::FLOW_FAILED, Phase::Callback, "google")
                .flow(Some("flow-1"))
                .failed("StateMismatch"),
        );
        recorder.on_event(&started("flow-2"));

        recorder.on_event(
            &FlowEvent::new(names::STRATEGY_ATTEMPTED, Phase::Exchange, "google")
                .flow(Some("flow-1"))
                .failed("late"),
        );
        recorder.on_event(
            &FlowEvent::new(names::FLOW_COMPLETED, Phase::Session, "google").flow(Some("flow-1")),
        );

        let closed = recorder.export_session("flow-1").unwrap();
        assert_eq!(closed.events.len(), 2);
        assert_eq!(closed.error_count, 1);
        assert_eq!(closed.final_state, FinalState::Failure);
        assert_eq!(recorder.sessions().len(), 2);
        assert_eq!(recorder.open_session("google"), Some("flow-2".to_string()));
    }

    #[test]
    fn test_events_without_flow_id_join_open_session() {
        let recorder = Recorder::new();
        recorder.on_event(&started("flow-1"));
        recorder.on_event(&FlowEvent::new(
            names::CALLBACK_RECEIVED,
            Phase::Callback,
            "google",
        ));

        assert_eq!(recorder.export_session("flow-1").unwrap().events.len(), 2);
        assert_eq!(recorder.sessions().len(), 1);
    }

    #[test]
    fn test_callback_in_fresh_recorder_opens_session() {
        let recorder = Recorder::new();
        recorder.on_event(
            &FlowEvent::new(names::FLOW_FAILED, Phase::Callback, "google")
                .failed("ProviderDenied"),
        );

        let sessions = recorder.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].final_state, FinalState::Failure);
        assert_eq!(sessions[0].provider, "google");
    }

    #[test]
    fn test_flow_id_learned_mid_session_resolves_on_export() {
        let recorder = Recorder::new();
        recorder.on_event(&FlowEvent::new(
            names::CALLBACK_RECEIVED,
            Phase::Callback,
            "google",
        ));
        recorder.on_event(
            &FlowEvent::new(names::PARAMETERS_CONSUMED, Phase::Storage, "google")
                .flow(Some("flow-9")),
        );

        let session = recorder.export_session("flow-9").unwrap();
        assert_eq!(session.events.len(), 2);
        assert_eq!(recorder.sessions().len(), 1);
    }

    #[test]
    fn test_restart_closes_previous_pending_session() {
        let recorder = Recorder::new();
        recorder.on_event(&started("flow-1"));
        recorder.on_event(&started("flow-2"));

        assert_eq!(
            recorder.export_session("flow-1").unwrap().final_state,
            FinalState::Failure
        );
        assert_eq!(recorder.open_session("google"), Some("flow-2".to_string()));
    }

    #[test]
    fn test_log_event_and_clear() {
        let recorder = Recorder::new();
        recorder.log_event(
            "manual",
            "note",
            Phase::Validation,
            false,
            BTreeMap::new(),
            Some("boom".to_string()),
        );
        assert_eq!(recorder.export_session("manual").unwrap().error_count, 1);

        recorder.clear();
        assert!(recorder.export_session("manual").is_none());
        assert!(recorder.sessions().is_empty());
    }
}
