//! Observation of flow phase transitions.
//!
//! The orchestrator, parameter manager and exchange chain emit [`FlowEvent`]s to any
//! attached [`FlowObserver`]s and never read anything back, so observers cannot
//! influence protocol decisions.

mod recorder;

pub use recorder::{FinalState, OAuthSession, PhaseEvent, Recorder};

use std::collections::BTreeMap;
use std::sync::Arc;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event names emitted by this crate.
pub mod names {
    pub const FLOW_STARTED: &str = "flow_started";
    pub const PARAMETERS_GENERATED: &str = "pkce_parameters_generated";
    pub const PARAMETERS_CONSUMED: &str = "pkce_parameters_consumed";
    pub const PARAMETERS_CLEARED: &str = "pkce_parameters_cleared";
    pub const AUTHORIZATION_URL_BUILT: &str = "authorization_url_built";
    pub const CALLBACK_RECEIVED: &str = "callback_received";
    pub const STATE_VALIDATED: &str = "state_validated";
    pub const STRATEGY_ATTEMPTED: &str = "exchange_strategy_attempted";
    pub const SESSION_CREATED: &str = "session_created";
    pub const FLOW_COMPLETED: &str = "flow_completed";
    pub const FLOW_FAILED: &str = "flow_failed";
}

/// Protocol phase an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initiate,
    Storage,
    Callback,
    Validation,
    Exchange,
    Session,
}

/// A named secret attached to an event. Recorders decide how much of it to keep.
#[derive(Debug, Clone)]
pub struct SecretField {
    pub name: &'static str,
    pub value: Option<SecretString>,
}

/// One observable step of a flow.
#[derive(Debug, Clone)]
pub struct FlowEvent {
    pub name: &'static str,
    pub phase: Phase,
    pub provider: String,
    /// Correlation id shared by both legs, when known at this point.
    pub flow_id: Option<String>,
    pub success: bool,
    pub metadata: BTreeMap<String, Value>,
    pub secrets: Vec<SecretField>,
    pub error: Option<String>,
}

impl FlowEvent {
    pub fn new(name: &'static str, phase: Phase, provider: &str) -> Self {
        Self {
            name,
            phase,
            provider: provider.to_string(),
            flow_id: None,
            success: true,
            metadata: BTreeMap::new(),
            secrets: Vec::new(),
            error: None,
        }
    }

    pub fn flow(mut self, flow_id: Option<&str>) -> Self {
        self.flow_id = flow_id.map(str::to_string);
        self
    }

    pub fn meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn secret(mut self, name: &'static str, value: Option<&str>) -> Self {
        self.secrets.push(SecretField {
            name,
            value: value.map(|v| SecretString::new(v.to_string())),
        });
        self
    }

    /// Mark the event failed with `error`.
    pub fn failed(mut self, error: impl ToString) -> Self {
        self.success = false;
        self.error = Some(error.to_string());
        self
    }
}

/// Receives flow events. Implementations must not panic and must not block for long.
pub trait FlowObserver: Send + Sync {
    fn on_event(&self, event: &FlowEvent);
}

/// Shared, cheaply cloneable set of observers.
#[derive(Clone, Default)]
pub struct Observers(Vec<Arc<dyn FlowObserver>>);

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: Arc<dyn FlowObserver>) -> Self {
        self.0.push(observer);
        self
    }

    pub fn emit(&self, event: FlowEvent) {
        for observer in &self.0 {
            observer.on_event(&event);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("count", &self.0.len())
            .finish()
    }
}
