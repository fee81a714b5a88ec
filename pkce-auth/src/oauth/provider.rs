//! OAuth provider configuration and authorization URL building.

use serde::{Deserialize, Serialize};
use url::Url;

use super::params::PkceParameters;
use crate::error::{oauth_error, Error, OAuthErrorKind};

/// Authorization request handed back to the caller for navigation.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// Authorization URL to redirect the user to.
    pub url: String,
    /// CSRF state parameter embedded in the URL.
    pub state: String,
    /// Correlation id of this attempt, for diagnostics.
    pub flow_id: String,
}

/// Everything needed to talk to one identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider key (e.g. "google"); also the storage namespace.
    pub name: String,
    /// Public OAuth client identifier.
    pub client_id: String,
    /// Provider authorization endpoint.
    pub authorization_endpoint: String,
    /// Primary token endpoint.
    pub token_endpoint: String,
    /// Secondary token endpoint tried after the primary one fails.
    pub fallback_token_endpoint: Option<String>,
    /// Redirect URI registered with the provider.
    pub redirect_uri: String,
    /// Requested scopes, sent space-delimited.
    pub scopes: Vec<String>,
    /// Provider-specific query parameters (e.g. `access_type`, `prompt`).
    pub extra_params: Vec<(String, String)>,
}

impl ProviderConfig {
    /// Create a configuration without scopes, extras or fallback endpoint.
    pub fn new(
        name: &str,
        client_id: &str,
        authorization_endpoint: &str,
        token_endpoint: &str,
        redirect_uri: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            client_id: client_id.to_string(),
            authorization_endpoint: authorization_endpoint.to_string(),
            token_endpoint: token_endpoint.to_string(),
            fallback_token_endpoint: None,
            redirect_uri: redirect_uri.to_string(),
            scopes: Vec::new(),
            extra_params: Vec::new(),
        }
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_extra_param(mut self, key: &str, value: &str) -> Self {
        self.extra_params.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_fallback_token_endpoint(mut self, endpoint: &str) -> Self {
        self.fallback_token_endpoint = Some(endpoint.to_string());
        self
    }

    /// Build the authorization URL for a stored parameter set.
    ///
    /// Query parameters already present on the endpoint are preserved.
    pub fn authorization_url(&self, params: &PkceParameters) -> Result<String, Error> {
        let mut url = Url::parse(&self.authorization_endpoint).map_err(|e| {
            oauth_error(
                OAuthErrorKind::InvalidProviderConfig,
                &format!("invalid authorization endpoint for {}: {}", self.name, e),
            )
        })?;

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.client_id)
                .append_pair("redirect_uri", &self.redirect_uri)
                .append_pair("response_type", "code")
                .append_pair("code_challenge", &params.code_challenge)
                .append_pair("code_challenge_method", &params.code_challenge_method)
                .append_pair("state", &params.state);
            if !self.scopes.is_empty() {
                query.append_pair("scope", &self.scopes.join(" "));
            }
            for (key, value) in &self.extra_params {
                query.append_pair(key, value);
            }
        }

        Ok(url.into())
    }
}
