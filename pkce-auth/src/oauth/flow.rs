//! Authorization code flow orchestration.
//!
//! The [`Orchestrator`] sequences both legs of a flow for each configured provider:
//! `initiate` builds the authorization URL and `handle_callback` validates the
//! redirect, exchanges the code and hands tokens to the [`SessionStore`].
//!
//! The two legs share nothing but the redirect URL and the parameter store, so a
//! callback can be completed by a different process than the one that initiated it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::Duration;
use dashmap::DashMap;
use secrecy::SecretString;
use serde::Serialize;
use tracing::{error, info, warn};
use url::Url;
use uuid::Uuid;

use super::exchange::{ExchangeChain, ExchangeRequest};
use super::params::ParameterManager;
use super::provider::{AuthorizationRequest, ProviderConfig};
use super::token::SessionStore;
use crate::crypto;
use crate::diagnostics::{names, FlowEvent, FlowObserver, Observers, Phase};
use crate::error::{oauth_error, Error, ErrorKind, OAuthErrorKind, SessionErrorKind};
use crate::store::KeyValueStore;

/// Per-provider position in the flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    Initiated,
    Redirected,
    CallbackReceived,
    Exchanging,
    Complete,
    Failed(ErrorKind),
}

/// Query parameters of the redirect back from the provider.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Parse from a raw query string, with or without the leading `?`.
    pub fn from_query(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let slot = match &*key {
                "code" => &mut params.code,
                "state" => &mut params.state,
                "error" => &mut params.error,
                "error_description" => &mut params.error_description,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }
        params
    }

    /// Parse from the full callback URL. Falls back to the fragment when the
    /// query carries nothing.
    pub fn from_url(callback_url: &str) -> Result<Self, Error> {
        let url = Url::parse(callback_url).map_err(|e| {
            oauth_error(
                OAuthErrorKind::MissingAuthorizationCode,
                &format!("callback URL could not be parsed: {}", e),
            )
        })?;

        let params = Self::from_query(url.query().unwrap_or_default());
        if params == Self::default() {
            if let Some(fragment) = url.fragment() {
                return Ok(Self::from_query(fragment));
            }
        }
        Ok(params)
    }
}

impl fmt::Debug for CallbackParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackParams")
            .field("code_present", &self.code.is_some())
            .field("state_present", &self.state.is_some())
            .field("error", &self.error)
            .field("error_description", &self.error_description)
            .finish()
    }
}

/// Secret-free summary of a completed flow.
#[derive(Debug, Clone, Serialize)]
pub struct CompletedFlow {
    pub provider: String,
    pub flow_id: String,
    /// Exchange strategy that produced the tokens.
    pub strategy: String,
    pub token_type: String,
    pub expires_in: Option<u64>,
    pub refresh_token_issued: bool,
    /// Strategies that failed before the winning one.
    pub failed_attempts: usize,
}

struct ProviderEntry {
    config: ProviderConfig,
    chain: ExchangeChain,
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    store: Arc<dyn KeyValueStore>,
    session_store: Arc<dyn SessionStore>,
    providers: Vec<ProviderEntry>,
    observers: Observers,
    ttl: Option<Duration>,
}

impl OrchestratorBuilder {
    /// Register a provider with the exchange chain used for its callbacks.
    pub fn provider(mut self, config: ProviderConfig, chain: ExchangeChain) -> Self {
        self.providers.push(ProviderEntry { config, chain });
        self
    }

    pub fn observer(mut self, observer: Arc<dyn FlowObserver>) -> Self {
        self.observers = self.observers.with(observer);
        self
    }

    /// Override the parameter TTL (10 minutes by default).
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn build(self) -> Orchestrator {
        let mut params = ParameterManager::new(self.store).with_observers(self.observers.clone());
        if let Some(ttl) = self.ttl {
            params = params.with_ttl(ttl);
        }

        let providers = self
            .providers
            .into_iter()
            .map(|entry| {
                let chain = entry.chain.with_observers(self.observers.clone());
                (
                    entry.config.name.clone(),
                    ProviderEntry {
                        config: entry.config,
                        chain,
                    },
                )
            })
            .collect();

        Orchestrator {
            params,
            session_store: self.session_store,
            providers,
            states: DashMap::new(),
            observers: self.observers,
        }
    }
}

/// Drives the authorization code flow for a set of providers.
pub struct Orchestrator {
    params: ParameterManager,
    session_store: Arc<dyn SessionStore>,
    providers: HashMap<String, ProviderEntry>,
    states: DashMap<String, FlowState>,
    observers: Observers,
}

impl Orchestrator {
    pub fn builder(
        store: Arc<dyn KeyValueStore>,
        session_store: Arc<dyn SessionStore>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            store,
            session_store,
            providers: Vec::new(),
            observers: Observers::new(),
            ttl: None,
        }
    }

    /// Parameter manager backing this orchestrator, for diagnostics and cleanup.
    pub fn parameters(&self) -> &ParameterManager {
        &self.params
    }

    /// Names of the configured providers.
    pub fn providers(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    /// Current state for `provider`; `Idle` when nothing happened yet.
    pub fn state(&self, provider: &str) -> FlowState {
        self.states
            .get(provider)
            .map(|s| *s)
            .unwrap_or(FlowState::Idle)
    }

    /// Start a flow and return the URL to navigate to.
    ///
    /// Does not navigate. Any earlier unconsumed attempt for the provider is replaced.
    pub async fn initiate(&self, provider: &str) -> Result<AuthorizationRequest, Error> {
        let entry = self.entry(provider)?;
        let flow_id = Uuid::new_v4().to_string();

        self.set_state(provider, FlowState::Initiated);
        self.observers.emit(
            FlowEvent::new(names::FLOW_STARTED, Phase::Initiate, provider)
                .flow(Some(flow_id.as_str()))
                .meta("strategies", entry.chain.len()),
        );

        let params = match self.params.generate_for_flow(provider, &flow_id).await {
            Ok(params) => params,
            Err(e) => return Err(self.fail(provider, Some(&flow_id), e)),
        };

        let url = match entry.config.authorization_url(&params) {
            Ok(url) => url,
            Err(e) => {
                if let Err(clear_err) = self.params.clear(Some(provider)).await {
                    warn!(
                        "Could not discard parameters for {} after URL failure: {}",
                        provider, clear_err
                    );
                }
                return Err(self.fail(provider, Some(&flow_id), e));
            }
        };

        self.observers.emit(
            FlowEvent::new(names::AUTHORIZATION_URL_BUILT, Phase::Initiate, provider)
                .flow(Some(flow_id.as_str()))
                .meta("url_length", url.len())
                .meta("scopes", entry.config.scopes.join(" "))
                .secret("state", Some(params.state.as_str())),
        );
        self.set_state(provider, FlowState::Redirected);
        info!("Initiated OAuth flow {} for {}", flow_id, provider);

        Ok(AuthorizationRequest {
            url,
            state: params.state,
            flow_id,
        })
    }

    /// Complete a flow from the provider's redirect.
    ///
    /// Stored parameters are consumed before anything is sent to the provider, so a
    /// replayed callback finds nothing. A missing or mismatched state fails closed
    /// without invoking the exchange chain.
    pub async fn handle_callback(
        &self,
        provider: &str,
        callback: &CallbackParams,
    ) -> Result<CompletedFlow, Error> {
        let entry = self.entry(provider)?;

        self.set_state(provider, FlowState::CallbackReceived);
        self.observers.emit(
            FlowEvent::new(names::CALLBACK_RECEIVED, Phase::Callback, provider)
                .meta("error_present", callback.error.is_some())
                .secret("code", callback.code.as_deref())
                .secret("state", callback.state.as_deref()),
        );

        if let Some(provider_error) = &callback.error {
            let message = match &callback.error_description {
                Some(description) => format!("{}: {}", provider_error, description),
                None => provider_error.clone(),
            };
            let err = oauth_error(OAuthErrorKind::ProviderDenied, &message);
            return Err(self.fail(provider, None, err));
        }

        let code = match callback.code.as_deref() {
            Some(code) if !code.is_empty() => code,
            _ => {
                let err = oauth_error(
                    OAuthErrorKind::MissingAuthorizationCode,
                    "callback carried no authorization code",
                );
                return Err(self.fail(provider, None, err));
            }
        };

        let params = match self.params.consume(provider).await {
            Ok(Some(params)) => params,
            Ok(None) => {
                let err = oauth_error(
                    OAuthErrorKind::PkceStateNotFound,
                    &format!("no usable PKCE parameters stored for {}", provider),
                );
                return Err(self.fail(provider, None, err));
            }
            Err(e) => return Err(self.fail(provider, None, e)),
        };
        let flow_id = params.flow_id.as_str();

        let state_matches = callback
            .state
            .as_deref()
            .map(|state| crypto::constant_time_eq(state.as_bytes(), params.state.as_bytes()))
            .unwrap_or(false);
        let validated = FlowEvent::new(names::STATE_VALIDATED, Phase::Validation, provider)
            .flow(Some(flow_id))
            .meta("state_present", callback.state.is_some());
        if !state_matches {
            self.observers.emit(validated.failed("state mismatch"));
            let err = oauth_error(
                OAuthErrorKind::StateMismatch,
                "returned state does not match the stored state",
            );
            return Err(self.fail(provider, Some(flow_id), err));
        }
        self.observers.emit(validated);

        self.set_state(provider, FlowState::Exchanging);
        let request = ExchangeRequest {
            provider: provider.to_string(),
            flow_id: flow_id.to_string(),
            code: SecretString::new(code.to_string()),
            code_verifier: SecretString::new(params.code_verifier.clone()),
            redirect_uri: entry.config.redirect_uri.clone(),
            client_id: entry.config.client_id.clone(),
        };
        let success = match entry.chain.exchange(&request).await {
            Ok(success) => success,
            Err(e) => return Err(self.fail(provider, Some(flow_id), e)),
        };

        let tokens = &success.tokens;
        if let Err(e) = self
            .session_store
            .create_session(&tokens.access_token, tokens.refresh_token.as_ref())
            .await
        {
            self.observers.emit(
                FlowEvent::new(names::SESSION_CREATED, Phase::Session, provider)
                    .flow(Some(flow_id))
                    .failed(&e),
            );
            let err = Error {
                error_kind: ErrorKind::Session(SessionErrorKind::CreationFailed),
                ..e
            };
            return Err(self.fail(provider, Some(flow_id), err));
        }
        self.observers.emit(
            FlowEvent::new(names::SESSION_CREATED, Phase::Session, provider)
                .flow(Some(flow_id))
                .meta("refresh_token_present", tokens.refresh_token.is_some()),
        );

        let completed = CompletedFlow {
            provider: provider.to_string(),
            flow_id: flow_id.to_string(),
            strategy: success.strategy.clone(),
            token_type: tokens.token_type.clone(),
            expires_in: tokens.expires_in,
            refresh_token_issued: tokens.refresh_token.is_some(),
            failed_attempts: success.failures.len(),
        };

        self.set_state(provider, FlowState::Complete);
        self.observers.emit(
            FlowEvent::new(names::FLOW_COMPLETED, Phase::Session, provider)
                .flow(Some(flow_id))
                .meta("strategy", completed.strategy.as_str())
                .meta("failed_attempts", completed.failed_attempts),
        );
        info!(
            "Completed OAuth flow {} for {} via {}",
            completed.flow_id, provider, completed.strategy
        );

        Ok(completed)
    }

    /// Drop any in-flight attempt for `provider` and return it to `Idle`.
    pub async fn abandon(&self, provider: &str) -> Result<(), Error> {
        self.entry(provider)?;
        self.params.clear(Some(provider)).await?;

        let previous = self.state(provider);
        if matches!(previous, FlowState::Initiated | FlowState::Redirected) {
            self.observers.emit(
                FlowEvent::new(names::FLOW_FAILED, Phase::Initiate, provider)
                    .meta("abandoned", true)
                    .failed("flow abandoned"),
            );
        }
        self.set_state(provider, FlowState::Idle);
        Ok(())
    }

    fn entry(&self, provider: &str) -> Result<&ProviderEntry, Error> {
        self.providers.get(provider).ok_or_else(|| {
            warn!("OAuth provider {} is not configured", provider);
            oauth_error(
                OAuthErrorKind::UnknownProvider,
                &format!("provider {} is not configured", provider),
            )
        })
    }

    fn set_state(&self, provider: &str, state: FlowState) {
        self.states.insert(provider.to_string(), state);
    }

    /// Record a terminal failure and hand the error back for returning.
    fn fail(&self, provider: &str, flow_id: Option<&str>, err: Error) -> Error {
        let outcome = err.outcome();
        self.set_state(provider, FlowState::Failed(err.error_kind));
        error!("OAuth flow for {} failed ({:?}): {}", provider, outcome, err);
        self.observers.emit(
            FlowEvent::new(names::FLOW_FAILED, phase_of(err.error_kind), provider)
                .flow(flow_id)
                .meta("error_kind", format!("{:?}", err.error_kind))
                .meta("outcome", format!("{:?}", outcome))
                .failed(&err),
        );
        err
    }
}

fn phase_of(kind: ErrorKind) -> Phase {
    match kind {
        ErrorKind::Crypto(_) => Phase::Initiate,
        ErrorKind::Storage(_) => Phase::Storage,
        ErrorKind::OAuth(OAuthErrorKind::ProviderDenied)
        | ErrorKind::OAuth(OAuthErrorKind::MissingAuthorizationCode) => Phase::Callback,
        ErrorKind::OAuth(OAuthErrorKind::PkceStateNotFound)
        | ErrorKind::OAuth(OAuthErrorKind::StateMismatch) => Phase::Validation,
        ErrorKind::OAuth(OAuthErrorKind::UnknownProvider)
        | ErrorKind::OAuth(OAuthErrorKind::InvalidProviderConfig) => Phase::Initiate,
        ErrorKind::OAuth(_) | ErrorKind::Http(_) => Phase::Exchange,
        ErrorKind::Session(_) => Phase::Session,
    }
}
