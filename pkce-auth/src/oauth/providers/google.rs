//! Google OAuth provider preset.

use crate::oauth::ProviderConfig;

/// Provider key used for Google.
pub const NAME: &str = "google";

pub const AUTHORIZATION_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// Default Google configuration.
///
/// Requests `openid email profile` and asks for offline access with a forced
/// consent prompt so that Google issues a refresh token on every sign-in.
///
/// # Arguments
///
/// * `client_id` - Google OAuth client ID
/// * `redirect_uri` - OAuth redirect URI registered for the client
pub fn config(client_id: &str, redirect_uri: &str) -> ProviderConfig {
    ProviderConfig::new(
        NAME,
        client_id,
        AUTHORIZATION_ENDPOINT,
        TOKEN_ENDPOINT,
        redirect_uri,
    )
    .with_scopes(["openid", "email", "profile"])
    .with_extra_param("access_type", "offline")
    .with_extra_param("prompt", "consent")
}
