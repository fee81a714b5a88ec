//! Request authentication trait and API key implementation.

use reqwest::RequestBuilder;
use secrecy::{ExposeSecret, SecretString};

/// Applies credentials to a request before it is sent.
pub trait RequestAuth: Send + Sync {
    /// Apply authentication to a request builder.
    fn authenticate(&self, request: RequestBuilder) -> RequestBuilder;
}

/// API key header authentication.
///
/// # Examples
///
/// ```rust,ignore
/// // Gateway expecting: X-Api-Key: xxx
/// let auth = ApiKeyAuth::new("X-Api-Key", SecretString::new(key), "");
///
/// // Gateway expecting: Authorization: Token xxx
/// let auth = ApiKeyAuth::new("Authorization", SecretString::new(key), "Token");
/// ```
pub struct ApiKeyAuth {
    api_key: SecretString,
    header_name: String,
    prefix: Option<String>,
}

impl ApiKeyAuth {
    /// Create a new API key authenticator.
    ///
    /// # Arguments
    ///
    /// * `header_name` - Header carrying the key
    /// * `api_key` - The API key (stored securely)
    /// * `prefix` - Optional prefix for the header value; empty means none
    pub fn new(header_name: &str, api_key: SecretString, prefix: &str) -> Self {
        Self {
            api_key,
            header_name: header_name.to_string(),
            prefix: Some(prefix.to_string()).filter(|p| !p.is_empty()),
        }
    }
}

impl RequestAuth for ApiKeyAuth {
    fn authenticate(&self, request: RequestBuilder) -> RequestBuilder {
        let auth_value = if let Some(prefix) = &self.prefix {
            format!("{} {}", prefix, self.api_key.expose_secret())
        } else {
            self.api_key.expose_secret().to_string()
        };

        request.header(&self.header_name, auth_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_auth_with_prefix() {
        let auth = ApiKeyAuth::new("Authorization", SecretString::new("k".to_string()), "Token");
        let request = auth
            .authenticate(reqwest::Client::new().post("http://localhost/token"))
            .build()
            .unwrap();
        assert_eq!(request.headers()["authorization"], "Token k");
    }

    #[test]
    fn test_api_key_auth_empty_prefix_is_none() {
        let auth = ApiKeyAuth::new("X-Api-Key", SecretString::new("k".to_string()), "");
        assert_eq!(auth.prefix, None);
        assert_eq!(auth.header_name, "X-Api-Key");
    }

    #[test]
    fn test_authenticate_sets_header() {
        let auth = ApiKeyAuth::new("X-Api-Key", SecretString::new("k-123".to_string()), "");
        let request = auth
            .authenticate(reqwest::Client::new().post("http://localhost/token"))
            .build()
            .unwrap();
        assert_eq!(request.headers()["X-Api-Key"], "k-123");
    }
}
