//! Hand-off of issued tokens to the application's session layer.

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::Error;

/// External session store that turns issued tokens into a signed-in session.
///
/// Implementations should return [`crate::error::session_error`] on failure.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(
        &self,
        access_token: &SecretString,
        refresh_token: Option<&SecretString>,
    ) -> Result<(), Error>;
}
