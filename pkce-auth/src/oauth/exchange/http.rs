//! Token endpoint strategies over HTTP.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::RequestBuilder;
use secrecy::ExposeSecret;
use serde::Serialize;
use tracing::debug;

use super::{ExchangeRequest, ExchangeStrategy};
use crate::api_key::RequestAuth;
use crate::error::{Error, ErrorKind, HttpErrorKind};
use crate::oauth::token::TokenSet;

/// Longest slice of an error response body kept in failure messages.
const MAX_ERROR_BODY: usize = 256;

#[derive(Serialize)]
struct TokenRequestBody<'a> {
    grant_type: &'static str,
    code: &'a str,
    code_verifier: &'a str,
    redirect_uri: &'a str,
    client_id: &'a str,
}

impl<'a> TokenRequestBody<'a> {
    fn from_request(request: &'a ExchangeRequest) -> Self {
        Self {
            grant_type: "authorization_code",
            code: request.code.expose_secret(),
            code_verifier: request.code_verifier.expose_secret(),
            redirect_uri: &request.redirect_uri,
            client_id: &request.client_id,
        }
    }
}

/// Endpoint, client and optional gateway credentials shared by both body formats.
struct TokenEndpoint {
    name: String,
    client: reqwest::Client,
    endpoint: String,
    auth: Option<Arc<dyn RequestAuth>>,
}

impl TokenEndpoint {
    async fn send(&self, request: RequestBuilder) -> Result<TokenSet, Error> {
        let request = match &self.auth {
            Some(auth) => auth.authenticate(request),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(
            "Token endpoint {} answered {} to strategy {}",
            self.endpoint, status, self.name
        );

        if !status.is_success() {
            return Err(Error {
                source: Some(
                    format!("{} returned {}: {}", self.endpoint, status, truncate(&body)).into(),
                ),
                error_kind: ErrorKind::Http(HttpErrorKind::RequestFailed),
            });
        }

        TokenSet::from_response_body(&body)
    }
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((index, _)) => &body[..index],
        None => body,
    }
}

/// POSTs the token request as a JSON body.
pub struct JsonBodyStrategy {
    inner: TokenEndpoint,
}

impl JsonBodyStrategy {
    pub fn new(
        name: &str,
        client: reqwest::Client,
        endpoint: &str,
        auth: Option<Arc<dyn RequestAuth>>,
    ) -> Self {
        Self {
            inner: TokenEndpoint {
                name: name.to_string(),
                client,
                endpoint: endpoint.to_string(),
                auth,
            },
        }
    }
}

#[async_trait]
impl ExchangeStrategy for JsonBodyStrategy {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn attempt(&self, request: &ExchangeRequest) -> Result<TokenSet, Error> {
        let builder = self
            .inner
            .client
            .post(&self.inner.endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&TokenRequestBody::from_request(request));
        self.inner.send(builder).await
    }
}

/// POSTs the token request as `application/x-www-form-urlencoded`.
pub struct FormBodyStrategy {
    inner: TokenEndpoint,
}

impl FormBodyStrategy {
    pub fn new(
        name: &str,
        client: reqwest::Client,
        endpoint: &str,
        auth: Option<Arc<dyn RequestAuth>>,
    ) -> Self {
        Self {
            inner: TokenEndpoint {
                name: name.to_string(),
                client,
                endpoint: endpoint.to_string(),
                auth,
            },
        }
    }
}

#[async_trait]
impl ExchangeStrategy for FormBodyStrategy {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn attempt(&self, request: &ExchangeRequest) -> Result<TokenSet, Error> {
        let builder = self
            .inner
            .client
            .post(&self.inner.endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&TokenRequestBody::from_request(request));
        self.inner.send(builder).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_key::ApiKeyAuth;
    use crate::error::OAuthErrorKind;
    use mockito::{Matcher, Server};
    use secrecy::SecretString;

    fn request() -> ExchangeRequest {
        ExchangeRequest {
            provider: "google".to_string(),
            flow_id: "flow-1".to_string(),
            code: SecretString::new("auth-code".to_string()),
            code_verifier: SecretString::new("verifier".to_string()),
            redirect_uri: "https://app/cb".to_string(),
            client_id: "client-1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_json_strategy_posts_json_body() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(serde_json::json!({
                "grant_type": "authorization_code",
                "code": "auth-code",
                "code_verifier": "verifier",
                "redirect_uri": "https://app/cb",
                "client_id": "client-1"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"at","refresh_token":"rt","expires_in":3600}"#)
            .create_async()
            .await;

        let strategy = JsonBodyStrategy::new(
            "primary_json",
            reqwest::Client::new(),
            &format!("{}/token", server.url()),
            None,
        );
        let tokens = strategy.attempt(&request()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(tokens.access_token.expose_secret(), "at");
        assert_eq!(tokens.expires_in, Some(3600));
    }

    #[tokio::test]
    async fn test_form_strategy_posts_form_body_with_api_key() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_header("content-type", "application/x-www-form-urlencoded")
            .match_header("x-api-key", "backend-key")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("code".into(), "auth-code".into()),
                Matcher::UrlEncoded("code_verifier".into(), "verifier".into()),
                Matcher::UrlEncoded("redirect_uri".into(), "https://app/cb".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"form-at"}"#)
            .create_async()
            .await;

        let auth: Arc<dyn RequestAuth> = Arc::new(ApiKeyAuth::new(
            "X-Api-Key",
            SecretString::new("backend-key".to_string()),
            "",
        ));
        let strategy = FormBodyStrategy::new(
            "primary_form",
            reqwest::Client::new(),
            &format!("{}/token", server.url()),
            Some(auth),
        );
        let tokens = strategy.attempt(&request()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(tokens.access_token.expose_secret(), "form-at");
        assert!(tokens.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_non_success_status_is_failure() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let strategy = FormBodyStrategy::new(
            "primary_form",
            reqwest::Client::new(),
            &format!("{}/token", server.url()),
            None,
        );
        let err = strategy.attempt(&request()).await.unwrap_err();

        assert_eq!(err.error_kind, ErrorKind::Http(HttpErrorKind::RequestFailed));
        assert!(err.to_string().contains("400"));
        assert!(err.to_string().contains("invalid_grant"));
    }

    #[tokio::test]
    async fn test_error_member_on_200_is_failure() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"error":"invalid_request"}"#)
            .create_async()
            .await;

        let strategy = JsonBodyStrategy::new(
            "primary_json",
            reqwest::Client::new(),
            &format!("{}/token", server.url()),
            None,
        );
        let err = strategy.attempt(&request()).await.unwrap_err();
        assert_eq!(
            err.error_kind,
            ErrorKind::OAuth(OAuthErrorKind::InvalidResponse)
        );
    }

    #[test]
    fn test_truncate_long_bodies() {
        let body = "x".repeat(1000);
        assert_eq!(truncate(&body).len(), MAX_ERROR_BODY);
        assert_eq!(truncate("short"), "short");
    }
}
