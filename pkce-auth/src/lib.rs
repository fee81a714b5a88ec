//! # pkce-auth
//!
//! OAuth 2.0 Authorization Code flow with PKCE (RFC 7636) for public clients:
//! - Cryptographic primitives backed by the OS CSPRNG
//! - PKCE parameter generation and single-use storage keyed by provider
//! - Flow orchestration across the redirect boundary
//! - Token exchange through an ordered chain of request strategies
//! - A purely observational diagnostic recorder
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pkce_auth::{
//!     oauth::{exchange::ExchangeChain, providers::google, CallbackParams, Orchestrator},
//!     store::MemoryStore,
//! };
//!
//! let google = google::config(&client_id, &redirect_uri);
//! let chain = ExchangeChain::standard(client, &google, None);
//! let orchestrator = Orchestrator::builder(Arc::new(MemoryStore::new()), sessions)
//!     .provider(google, chain)
//!     .build();
//!
//! let request = orchestrator.initiate("google").await?;
//! // navigate to request.url, then on redirect:
//! let done = orchestrator
//!     .handle_callback("google", &CallbackParams::from_url(&redirect)?)
//!     .await?;
//! ```

pub mod api_key;
pub mod crypto;
pub mod diagnostics;
pub mod error;
pub mod http;
pub mod oauth;
pub mod store;

// Re-export commonly used types
pub use error::{Error, ErrorKind, Outcome};
