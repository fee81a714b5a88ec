//! PKCE parameter persistence between the initiation and callback legs.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::pkce::{PkceChallenge, PkceVerifier, CHALLENGE_LENGTH, CHALLENGE_METHOD_S256};
use crate::crypto;
use crate::diagnostics::{names, FlowEvent, Observers, Phase};
use crate::error::{Error, ErrorKind, StorageErrorKind};
use crate::store::KeyValueStore;

/// Namespace prefix for every key this manager owns.
const KEY_PREFIX: &str = "pkce:";

/// Bytes of entropy in the CSRF state token.
const STATE_BYTES: usize = 32;

/// Parameters of one in-flight authorization attempt.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkceParameters {
    pub code_verifier: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
    pub state: String,
    pub provider: String,
    pub created_at: DateTime<Utc>,
    /// Correlates both legs of the attempt in diagnostics.
    pub flow_id: String,
}

impl PkceParameters {
    pub fn verifier(&self) -> PkceVerifier {
        PkceVerifier::from_string(self.code_verifier.clone())
    }

    /// True once `ttl` has elapsed since creation.
    ///
    /// A deadline beyond the representable range never arrives.
    pub fn is_expired(&self, ttl: Duration) -> bool {
        match self.created_at.checked_add_signed(ttl) {
            Some(deadline) => Utc::now() > deadline,
            None => ttl < Duration::zero(),
        }
    }

    /// Format checks only; says nothing about whether a callback is legitimate.
    pub fn is_well_formed(&self) -> bool {
        let verifier = self.verifier();
        verifier.is_well_formed()
            && self.code_challenge.len() == CHALLENGE_LENGTH
            && PkceChallenge::from_verifier(&verifier).as_str() == self.code_challenge
            && self.code_challenge_method == CHALLENGE_METHOD_S256
            && self.state.len() >= 22
            && self.state != self.code_verifier
    }
}

impl fmt::Debug for PkceParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PkceParameters")
            .field("code_verifier_len", &self.code_verifier.len())
            .field("code_challenge", &self.code_challenge)
            .field("code_challenge_method", &self.code_challenge_method)
            .field("state_len", &self.state.len())
            .field("provider", &self.provider)
            .field("created_at", &self.created_at)
            .field("flow_id", &self.flow_id)
            .finish()
    }
}

/// Generates, stores and hands out PKCE parameters keyed by provider.
///
/// This is the only component that reads or writes the `pkce:` keys of the store.
/// Entries expire after the TTL (10 minutes unless configured otherwise).
#[derive(Clone)]
pub struct ParameterManager {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
    observers: Observers,
}

impl ParameterManager {
    /// Create a new parameter manager with default TTL of 10 minutes.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            ttl: Duration::minutes(10),
            observers: Observers::new(),
        }
    }

    /// Override the default TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_observers(mut self, observers: Observers) -> Self {
        self.observers = observers;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Create a fresh parameter set for `provider` and persist it.
    ///
    /// Any unconsumed set for the same provider is overwritten. If the write
    /// fails nothing is returned, so a caller can never redirect with
    /// parameters it will not be able to read back.
    pub async fn generate(&self, provider: &str) -> Result<PkceParameters, Error> {
        self.generate_for_flow(provider, &Uuid::new_v4().to_string())
            .await
    }

    /// Same as [`generate`](Self::generate), tagging the set with an existing flow id.
    pub async fn generate_for_flow(
        &self,
        provider: &str,
        flow_id: &str,
    ) -> Result<PkceParameters, Error> {
        let verifier = PkceVerifier::generate()?;
        let challenge = verifier.challenge();
        let params = PkceParameters {
            code_verifier: verifier.as_str().to_string(),
            code_challenge: challenge.as_str().to_string(),
            code_challenge_method: CHALLENGE_METHOD_S256.to_string(),
            state: crypto::random_token(STATE_BYTES)?,
            provider: provider.to_string(),
            created_at: Utc::now(),
            flow_id: flow_id.to_string(),
        };

        let encoded = serde_json::to_string(&params).map_err(|e| Error {
            source: Some(Box::new(e)),
            error_kind: ErrorKind::Storage(StorageErrorKind::Unavailable),
        })?;

        if let Err(e) = self.store.set(&Self::key(provider), &encoded).await {
            warn!("Failed to persist PKCE parameters for {}: {}", provider, e);
            self.observers.emit(
                FlowEvent::new(names::PARAMETERS_GENERATED, Phase::Storage, provider)
                    .flow(Some(params.flow_id.as_str()))
                    .failed(&e),
            );
            return Err(Error {
                error_kind: ErrorKind::Storage(StorageErrorKind::Unavailable),
                ..e
            });
        }

        debug!("Stored PKCE parameters for {}", provider);
        self.observers.emit(
            FlowEvent::new(names::PARAMETERS_GENERATED, Phase::Storage, provider)
                .flow(Some(params.flow_id.as_str()))
                .meta("code_challenge_method", CHALLENGE_METHOD_S256)
                .meta("ttl_seconds", self.ttl.num_seconds())
                .secret("code_verifier", Some(params.code_verifier.as_str()))
                .secret("code_challenge", Some(params.code_challenge.as_str()))
                .secret("state", Some(params.state.as_str())),
        );
        Ok(params)
    }

    /// Read the parameters for `provider` without removing them.
    ///
    /// Returns `None` when absent or expired; expired entries are purged.
    pub async fn retrieve(&self, provider: &str) -> Result<Option<PkceParameters>, Error> {
        let key = Self::key(provider);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(None);
        };
        let params = self.decode(&key, &raw).await?;
        if params.is_expired(self.ttl) {
            debug!("PKCE parameters for {} expired", provider);
            self.store.delete(&key).await?;
            return Ok(None);
        }
        Ok(Some(params))
    }

    /// Read and remove the parameters for `provider`.
    ///
    /// A second call for the same set always returns `None`.
    pub async fn consume(&self, provider: &str) -> Result<Option<PkceParameters>, Error> {
        let key = Self::key(provider);
        let Some(raw) = self.store.take(&key).await? else {
            self.observers.emit(
                FlowEvent::new(names::PARAMETERS_CONSUMED, Phase::Storage, provider)
                    .failed("no stored parameters"),
            );
            return Ok(None);
        };
        let params = self.decode(&key, &raw).await?;
        if params.is_expired(self.ttl) {
            self.observers.emit(
                FlowEvent::new(names::PARAMETERS_CONSUMED, Phase::Storage, provider)
                    .flow(Some(params.flow_id.as_str()))
                    .meta("age_seconds", (Utc::now() - params.created_at).num_seconds())
                    .failed("stored parameters expired"),
            );
            return Ok(None);
        }

        self.observers.emit(
            FlowEvent::new(names::PARAMETERS_CONSUMED, Phase::Storage, provider)
                .flow(Some(params.flow_id.as_str()))
                .meta("age_seconds", (Utc::now() - params.created_at).num_seconds())
                .secret("code_verifier", Some(params.code_verifier.as_str())),
        );
        Ok(Some(params))
    }

    /// Structural check of the stored set: present, well formed and within TTL.
    ///
    /// Diagnostic only. A `true` here is never grounds for accepting a callback.
    pub async fn validate(&self, provider: &str) -> Result<bool, Error> {
        let raw = match self.store.get(&Self::key(provider)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(false),
            Err(e) if is_unreadable(&e) => return Ok(false),
            Err(e) => return Err(e),
        };
        Ok(serde_json::from_str::<PkceParameters>(&raw)
            .map(|p| p.provider == provider && !p.is_expired(self.ttl) && p.is_well_formed())
            .unwrap_or(false))
    }

    /// Remove one provider's parameters, or every provider's when `None`.
    pub async fn clear(&self, provider: Option<&str>) -> Result<(), Error> {
        let keys = match provider {
            Some(provider) => vec![Self::key(provider)],
            None => self.store.keys(KEY_PREFIX).await?,
        };
        for key in &keys {
            self.store.delete(key).await?;
        }
        debug!("Cleared {} PKCE parameter entries", keys.len());
        self.observers.emit(
            FlowEvent::new(
                names::PARAMETERS_CLEARED,
                Phase::Storage,
                provider.unwrap_or("*"),
            )
            .meta("entries", keys.len()),
        );
        Ok(())
    }

    /// Remove every expired (or unreadable) entry. Returns how many were removed.
    ///
    /// Entries that fail to decrypt, e.g. after a key rotation, count as unreadable.
    pub async fn purge_expired(&self) -> Result<usize, Error> {
        let mut removed = 0;
        for key in self.store.keys(KEY_PREFIX).await? {
            let stale = match self.store.get(&key).await {
                Ok(Some(raw)) => serde_json::from_str::<PkceParameters>(&raw)
                    .map(|p| p.is_expired(self.ttl))
                    .unwrap_or(true),
                Ok(None) => continue,
                Err(e) if is_unreadable(&e) => {
                    warn!("Discarding unreadable PKCE entry {}: {}", key, e);
                    true
                }
                Err(e) => return Err(e),
            };
            if stale {
                self.store.delete(&key).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn decode(&self, key: &str, raw: &str) -> Result<PkceParameters, Error> {
        match serde_json::from_str(raw) {
            Ok(params) => Ok(params),
            Err(e) => {
                warn!("Discarding unreadable PKCE entry {}", key);
                self.store.delete(key).await?;
                Err(Error {
                    source: Some(Box::new(e)),
                    error_kind: ErrorKind::Storage(StorageErrorKind::Corrupt),
                })
            }
        }
    }

    fn key(provider: &str) -> String {
        format!("{}{}", KEY_PREFIX, provider)
    }
}

fn is_unreadable(err: &Error) -> bool {
    matches!(
        err.error_kind,
        ErrorKind::Storage(StorageErrorKind::Corrupt | StorageErrorKind::DecryptionFailed)
    )
}
