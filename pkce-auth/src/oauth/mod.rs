//! OAuth 2.0 authorization code flow with PKCE.
//!
//! - [`pkce`]: verifier and challenge types
//! - [`ParameterManager`]: per-provider storage of in-flight parameters
//! - [`Orchestrator`]: the two legs of the flow
//! - [`exchange`]: ordered token exchange strategies
//! - [`token`]: issued tokens and the session hand-off

mod flow;
mod params;
mod pkce;
mod provider;

pub mod exchange;
pub mod providers;
pub mod token;

pub use flow::{CallbackParams, CompletedFlow, FlowState, Orchestrator, OrchestratorBuilder};
pub use params::{ParameterManager, PkceParameters};
pub use pkce::{PkceChallenge, PkceVerifier, CHALLENGE_LENGTH, CHALLENGE_METHOD_S256, VERIFIER_LENGTH};
pub use provider::{AuthorizationRequest, ProviderConfig};
