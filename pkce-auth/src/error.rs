//! Error types for the `pkce-auth` crate.
//!
//! A root Error struct carries an error kind enum and an optional source for chaining.
//! Every error also classifies into a small set of [`Outcome`]s so that callers never have
//! to surface a raw provider string to a user.

use std::error::Error as StdError;
use std::fmt;

use crate::oauth::exchange::ExchangeFailure;

/// Top-level error type for pkce-auth crate.
/// Holds error kind and optional source for error chaining.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Major categories of errors in pkce-auth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Crypto(CryptoErrorKind),
    Storage(StorageErrorKind),
    OAuth(OAuthErrorKind),
    Session(SessionErrorKind),
    Http(HttpErrorKind),
}

/// Errors from the cryptographic primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoErrorKind {
    /// No cryptographically secure random source could be reached.
    Unavailable,
}

/// Errors from the key-value store holding PKCE parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    Unavailable,
    Corrupt,
    EncryptionFailed,
    DecryptionFailed,
}

/// Errors from the authorization code flow itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthErrorKind {
    /// No usable (present and unexpired) parameters for the provider.
    PkceStateNotFound,
    /// The state returned by the provider does not match the stored one.
    StateMismatch,
    /// The provider redirected back with an `error` parameter.
    ProviderDenied,
    /// The callback carried neither `error` nor `code`.
    MissingAuthorizationCode,
    /// Every exchange strategy failed.
    ExchangeFailed,
    /// The provider is not configured on the orchestrator.
    UnknownProvider,
    /// The provider configuration cannot produce a valid request (bad endpoint URL).
    InvalidProviderConfig,
    /// The token endpoint answered with something that is not a token set.
    InvalidResponse,
}

/// Errors from the external session store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionErrorKind {
    CreationFailed,
}

/// Errors from HTTP client operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpErrorKind {
    BuilderFailed,
    RequestFailed,
    Network,
}

/// The restart-safe outcome a user interface should present for an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The user can start authentication again.
    Restart,
    /// Possible CSRF or code injection; restart, but report it.
    SecurityEvent,
    /// The user (or the provider on their behalf) declined.
    Denied,
    /// The environment is misconfigured; retrying will not help.
    Fatal,
}

impl ErrorKind {
    /// Classify this kind into the outcome presented to users.
    pub fn outcome(&self) -> Outcome {
        match self {
            ErrorKind::Crypto(_) => Outcome::Fatal,
            ErrorKind::Storage(StorageErrorKind::Corrupt) => Outcome::Restart,
            ErrorKind::Storage(_) => Outcome::Fatal,
            ErrorKind::OAuth(OAuthErrorKind::StateMismatch) => Outcome::SecurityEvent,
            ErrorKind::OAuth(OAuthErrorKind::ProviderDenied) => Outcome::Denied,
            ErrorKind::OAuth(OAuthErrorKind::UnknownProvider)
            | ErrorKind::OAuth(OAuthErrorKind::InvalidProviderConfig) => Outcome::Fatal,
            ErrorKind::OAuth(_) => Outcome::Restart,
            ErrorKind::Session(_) => Outcome::Restart,
            ErrorKind::Http(_) => Outcome::Restart,
        }
    }
}

impl Error {
    /// Restart-safe outcome for this error.
    pub fn outcome(&self) -> Outcome {
        self.error_kind.outcome()
    }

    /// Fixed, user-presentable message. Never contains provider-supplied text.
    pub fn user_message(&self) -> &'static str {
        match self.error_kind {
            ErrorKind::OAuth(OAuthErrorKind::PkceStateNotFound) => {
                "Your sign-in attempt expired or was already used. Please sign in again."
            }
            ErrorKind::OAuth(OAuthErrorKind::MissingAuthorizationCode) => {
                "The sign-in response was incomplete. Please sign in again."
            }
            _ => match self.outcome() {
                Outcome::Restart => "Sign-in could not be completed. Please try again.",
                Outcome::SecurityEvent => {
                    "Sign-in was rejected for security reasons. Please start again."
                }
                Outcome::Denied => "Sign-in was cancelled at the identity provider.",
                Outcome::Fatal => "Sign-in is unavailable on this device right now.",
            },
        }
    }

    /// Per-strategy failures when this is an `ExchangeFailed` error.
    pub fn exchange_failure(&self) -> Option<&ExchangeFailure> {
        self.source
            .as_ref()
            .and_then(|e| e.downcast_ref::<ExchangeFailure>())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Crypto(kind) => write!(f, "Crypto error: {:?}", kind)?,
            ErrorKind::Storage(kind) => write!(f, "Storage error: {:?}", kind)?,
            ErrorKind::OAuth(kind) => write!(f, "OAuth error: {:?}", kind)?,
            ErrorKind::Session(kind) => write!(f, "Session error: {:?}", kind)?,
            ErrorKind::Http(kind) => write!(f, "HTTP error: {:?}", kind)?,
        }
        if let Some(source) = &self.source {
            write!(f, ": {}", source)?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let error_kind = if err.is_builder() {
            ErrorKind::Http(HttpErrorKind::BuilderFailed)
        } else if err.is_request() {
            ErrorKind::Http(HttpErrorKind::RequestFailed)
        } else {
            ErrorKind::Http(HttpErrorKind::Network)
        };

        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Storage(StorageErrorKind::Corrupt),
        }
    }
}

/// Helper function to create crypto errors.
pub fn crypto_error(message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Crypto(CryptoErrorKind::Unavailable),
    }
}

/// Helper function to create storage errors.
pub fn storage_error(kind: StorageErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Storage(kind),
    }
}

/// Helper function to create OAuth errors.
pub fn oauth_error(kind: OAuthErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::OAuth(kind),
    }
}

/// Helper function to create session store errors.
pub fn session_error(message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Session(SessionErrorKind::CreationFailed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_mismatch_is_security_event() {
        let err = oauth_error(OAuthErrorKind::StateMismatch, "mismatch");
        assert_eq!(err.outcome(), Outcome::SecurityEvent);
    }

    #[test]
    fn test_crypto_and_storage_failures_are_fatal() {
        assert_eq!(crypto_error("no rng").outcome(), Outcome::Fatal);
        assert_eq!(
            storage_error(StorageErrorKind::Unavailable, "disk").outcome(),
            Outcome::Fatal
        );
    }

    #[test]
    fn test_recoverable_kinds_restart() {
        for kind in [
            OAuthErrorKind::PkceStateNotFound,
            OAuthErrorKind::MissingAuthorizationCode,
            OAuthErrorKind::ExchangeFailed,
        ] {
            assert_eq!(oauth_error(kind, "x").outcome(), Outcome::Restart);
        }
    }

    #[test]
    fn test_user_message_hides_provider_text() {
        let err = oauth_error(OAuthErrorKind::ProviderDenied, "access_denied: nope <script>");
        assert!(!err.user_message().contains("nope"));
        assert_eq!(err.outcome(), Outcome::Denied);
    }

    #[test]
    fn test_display_includes_source_message() {
        let err = oauth_error(OAuthErrorKind::ExchangeFailed, "invalid_grant");
        assert_eq!(err.to_string(), "OAuth error: ExchangeFailed: invalid_grant");
    }

    #[test]
    fn test_unreadable_json_is_corrupt_storage() {
        let err: Error = serde_json::from_str::<u32>("{").unwrap_err().into();
        assert_eq!(err.error_kind, ErrorKind::Storage(StorageErrorKind::Corrupt));
        assert_eq!(err.outcome(), Outcome::Restart);
    }
}
