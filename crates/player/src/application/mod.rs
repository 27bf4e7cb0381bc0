//! Application layer: credential resolution, the session store and the
//! commands it exposes

pub mod credentials;
pub mod error;
pub mod services;

pub use credentials::{AuthToken, CredentialError, CredentialResolver, TokenSource};
pub use error::CommandError;
