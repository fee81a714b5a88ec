//! Issued tokens and the session store they are handed to.

mod session;
mod tokens;

pub use session::SessionStore;
pub use tokens::TokenSet;
