//! OAuth token types.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::{oauth_error, Error, OAuthErrorKind};

/// Token endpoint response body as sent on the wire.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
    token_type: Option<String>,
    id_token: Option<String>,
    scope: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Tokens issued by a successful authorization code exchange.
#[derive(Debug, Clone)]
pub struct TokenSet {
    /// Access token for API requests.
    pub access_token: SecretString,
    /// Refresh token, when the provider issued one.
    pub refresh_token: Option<SecretString>,
    /// Access token lifetime in seconds.
    pub expires_in: Option<u64>,
    /// Token type (usually "Bearer").
    pub token_type: String,
    /// OpenID Connect ID token.
    pub id_token: Option<SecretString>,
    /// Granted scopes.
    pub scopes: Vec<String>,
}

impl TokenSet {
    /// Parse a token endpoint response body.
    ///
    /// Providers sometimes answer 200 with an `error` member; that and a missing
    /// or empty access token are both rejected.
    pub fn from_response_body(body: &str) -> Result<Self, Error> {
        let response: TokenResponse = serde_json::from_str(body).map_err(|e| {
            oauth_error(
                OAuthErrorKind::InvalidResponse,
                &format!("token response is not valid JSON: {}", e),
            )
        })?;

        if let Some(error) = response.error {
            let message = match response.error_description {
                Some(description) => format!("{}: {}", error, description),
                None => error,
            };
            return Err(oauth_error(OAuthErrorKind::InvalidResponse, &message));
        }

        let access_token = response
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                oauth_error(
                    OAuthErrorKind::InvalidResponse,
                    "token response has no access_token",
                )
            })?;

        Ok(Self {
            access_token: SecretString::new(access_token),
            refresh_token: response
                .refresh_token
                .filter(|t| !t.is_empty())
                .map(SecretString::new),
            expires_in: response.expires_in,
            token_type: response.token_type.unwrap_or_else(|| "Bearer".to_string()),
            id_token: response.id_token.map(SecretString::new),
            scopes: response
                .scope
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        })
    }

    /// Length of the access token, for diagnostics.
    pub fn access_token_len(&self) -> usize {
        self.access_token.expose_secret().len()
    }
}
