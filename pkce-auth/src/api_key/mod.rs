//! Request authentication for token endpoints.
//!
//! Some deployments put the token endpoint behind a gateway that expects an
//! API key in addition to the OAuth request body.

mod auth;

pub use auth::{ApiKeyAuth, RequestAuth};
