//! Token exchange strategy chain.
//!
//! Providers disagree on how the token request should look (JSON or form body,
//! primary or fallback endpoint). Each shape is a small [`ExchangeStrategy`]; the
//! [`ExchangeChain`] tries them strictly in order and stops at the first success.

mod http;

pub use http::{FormBodyStrategy, JsonBodyStrategy};

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use secrecy::SecretString;
use tracing::{error, info, warn};

use super::provider::ProviderConfig;
use super::token::TokenSet;
use crate::api_key::RequestAuth;
use crate::diagnostics::{names, FlowEvent, Observers, Phase};
use crate::error::{Error, ErrorKind, OAuthErrorKind};

/// Inputs of one authorization code exchange.
pub struct ExchangeRequest {
    pub provider: String,
    pub flow_id: String,
    pub code: SecretString,
    pub code_verifier: SecretString,
    pub redirect_uri: String,
    pub client_id: String,
}

impl fmt::Debug for ExchangeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeRequest")
            .field("provider", &self.provider)
            .field("flow_id", &self.flow_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// One way of turning an authorization code into tokens.
///
/// A strategy must not retry internally and must have no side effects when it fails.
#[async_trait]
pub trait ExchangeStrategy: Send + Sync {
    /// Stable name used in diagnostics and [`ExchangeSuccess::strategy`].
    fn name(&self) -> &str;

    async fn attempt(&self, request: &ExchangeRequest) -> Result<TokenSet, Error>;
}

/// A single failed attempt.
#[derive(Debug, Clone)]
pub struct StrategyFailure {
    pub strategy: String,
    pub error_kind: ErrorKind,
    pub message: String,
    pub elapsed_ms: u64,
}

/// All attempts of an exhausted chain, carried as the source of `ExchangeFailed`.
#[derive(Debug, Clone, Default)]
pub struct ExchangeFailure {
    pub attempts: Vec<StrategyFailure>,
}

impl ExchangeFailure {
    /// Message of the last attempt, if any strategy ran.
    pub fn last_message(&self) -> Option<&str> {
        self.attempts.last().map(|a| a.message.as_str())
    }
}

impl fmt::Display for ExchangeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.last_message() {
            Some(message) => write!(f, "{}", message),
            None => write!(f, "no exchange strategies configured"),
        }
    }
}

impl std::error::Error for ExchangeFailure {}

/// Tokens plus which strategy produced them and what failed before it.
#[derive(Debug)]
pub struct ExchangeSuccess {
    pub tokens: TokenSet,
    pub strategy: String,
    pub failures: Vec<StrategyFailure>,
}

/// Ordered list of exchange strategies.
#[derive(Clone, Default)]
pub struct ExchangeChain {
    strategies: Vec<Arc<dyn ExchangeStrategy>>,
    observers: Observers,
}

impl ExchangeChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a strategy; it runs after every strategy added before it.
    pub fn with_strategy(mut self, strategy: Arc<dyn ExchangeStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn with_observers(mut self, observers: Observers) -> Self {
        self.observers = observers;
        self
    }

    /// The default order for a provider: JSON to the primary endpoint, form to
    /// the primary endpoint, then form to the fallback endpoint if configured.
    pub fn standard(
        client: reqwest::Client,
        provider: &ProviderConfig,
        auth: Option<Arc<dyn RequestAuth>>,
    ) -> Self {
        let mut chain = Self::new()
            .with_strategy(Arc::new(JsonBodyStrategy::new(
                "primary_json",
                client.clone(),
                &provider.token_endpoint,
                auth.clone(),
            )))
            .with_strategy(Arc::new(FormBodyStrategy::new(
                "primary_form",
                client.clone(),
                &provider.token_endpoint,
                auth.clone(),
            )));

        if let Some(fallback) = &provider.fallback_token_endpoint {
            chain = chain.with_strategy(Arc::new(FormBodyStrategy::new(
                "fallback_form",
                client,
                fallback,
                auth,
            )));
        }

        chain
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Strategy names in execution order.
    pub fn strategy_names(&self) -> Vec<String> {
        self.strategies.iter().map(|s| s.name().to_string()).collect()
    }

    /// Run strategies in order until one succeeds.
    ///
    /// Returns `OAuth(ExchangeFailed)` when the chain is empty or exhausted. The
    /// error's Display is the last strategy's message and its source is an
    /// [`ExchangeFailure`] with every attempt.
    pub async fn exchange(&self, request: &ExchangeRequest) -> Result<ExchangeSuccess, Error> {
        let mut failures = Vec::new();

        for (index, strategy) in self.strategies.iter().enumerate() {
            let started = Instant::now();
            let result = strategy.attempt(request).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let event = FlowEvent::new(names::STRATEGY_ATTEMPTED, Phase::Exchange, &request.provider)
                .flow(Some(&request.flow_id))
                .meta("strategy", strategy.name())
                .meta("attempt", index + 1)
                .meta("elapsed_ms", elapsed_ms);

            match result {
                Ok(tokens) => {
                    info!(
                        "Token exchange for {} succeeded with strategy {} after {} failed attempt(s)",
                        request.provider,
                        strategy.name(),
                        failures.len()
                    );
                    self.observers.emit(
                        event
                            .meta("access_token_length", tokens.access_token_len())
                            .meta("refresh_token_present", tokens.refresh_token.is_some()),
                    );
                    return Ok(ExchangeSuccess {
                        tokens,
                        strategy: strategy.name().to_string(),
                        failures,
                    });
                }
                Err(e) => {
                    let message = match &e.source {
                        Some(source) => source.to_string(),
                        None => e.to_string(),
                    };
                    warn!(
                        "Token exchange strategy {} for {} failed: {}",
                        strategy.name(),
                        request.provider,
                        message
                    );
                    self.observers.emit(event.failed(&message));
                    failures.push(StrategyFailure {
                        strategy: strategy.name().to_string(),
                        error_kind: e.error_kind,
                        message,
                        elapsed_ms,
                    });
                }
            }
        }

        let failure = ExchangeFailure { attempts: failures };
        error!(
            "All {} token exchange strategies failed for {}",
            failure.attempts.len(),
            request.provider
        );
        Err(Error {
            source: Some(Box::new(failure)),
            error_kind: ErrorKind::OAuth(OAuthErrorKind::ExchangeFailed),
        })
    }
}

impl fmt::Debug for ExchangeChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeChain")
            .field("strategies", &self.strategy_names())
            .finish()
    }
}
