//! Credential resolution
//!
//! Locates the authentication token in storage, checking in order:
//! 1. `auth_tokens` - JSON bundle with an `access_token`
//! 2. `token` - a bare legacy token
//! 3. `auth-storage` - persisted store blob with `state.token` or
//!    `state.accessToken`
//!
//! An explicitly configured token wins over all of them. Malformed entries
//! are skipped, not fatal.

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::ports::outbound::StorageProvider;

pub const AUTH_TOKENS_KEY: &str = "auth_tokens";
pub const LEGACY_TOKEN_KEY: &str = "token";
pub const PERSISTED_STORE_KEY: &str = "auth-storage";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("no authentication token found")]
    Missing,
}

/// Bearer token. Debug output never shows the value.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Returns `None` for blank input
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into().trim().to_string();
        (!token.is_empty()).then_some(Self(token))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(***)")
    }
}

/// Where a token was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Configured,
    TokenBundle,
    LegacyToken,
    PersistedStore,
}

#[derive(Deserialize)]
struct TokenBundle {
    access_token: Option<String>,
}

/// Resolves the token on demand; nothing is cached, so a token written to
/// storage between reconnect attempts is picked up.
#[derive(Clone)]
pub struct CredentialResolver {
    storage: Arc<dyn StorageProvider>,
    configured: Option<AuthToken>,
}

impl CredentialResolver {
    pub fn new(storage: Arc<dyn StorageProvider>) -> Self {
        Self {
            storage,
            configured: None,
        }
    }

    /// Use `token` ahead of anything in storage
    pub fn with_configured_token(mut self, token: Option<String>) -> Self {
        self.configured = token.and_then(AuthToken::new);
        self
    }

    pub fn resolve(&self) -> Result<AuthToken, CredentialError> {
        self.resolve_with_source().map(|(token, _)| token)
    }

    pub fn resolve_with_source(&self) -> Result<(AuthToken, TokenSource), CredentialError> {
        if let Some(token) = &self.configured {
            return Ok((token.clone(), TokenSource::Configured));
        }
        if let Some(token) = self.from_bundle() {
            return Ok((token, TokenSource::TokenBundle));
        }
        if let Some(token) = self.from_legacy() {
            return Ok((token, TokenSource::LegacyToken));
        }
        if let Some(token) = self.from_persisted_store() {
            return Ok((token, TokenSource::PersistedStore));
        }
        tracing::debug!("No authentication token in storage");
        Err(CredentialError::Missing)
    }

    fn from_bundle(&self) -> Option<AuthToken> {
        let raw = self.storage.load(AUTH_TOKENS_KEY)?;
        match serde_json::from_str::<TokenBundle>(&raw) {
            Ok(bundle) => bundle.access_token.and_then(AuthToken::new),
            Err(e) => {
                tracing::debug!(error = %e, key = AUTH_TOKENS_KEY, "Skipping malformed token bundle");
                None
            }
        }
    }

    fn from_legacy(&self) -> Option<AuthToken> {
        let raw = self.storage.load(LEGACY_TOKEN_KEY)?;
        // Some writers JSON-encode the string
        let token = match serde_json::from_str::<String>(&raw) {
            Ok(decoded) => decoded,
            Err(_) => raw,
        };
        AuthToken::new(token)
    }

    fn from_persisted_store(&self) -> Option<AuthToken> {
        let raw = self.storage.load(PERSISTED_STORE_KEY)?;
        let blob: Value = match serde_json::from_str(&raw) {
            Ok(blob) => blob,
            Err(e) => {
                tracing::debug!(error = %e, key = PERSISTED_STORE_KEY, "Skipping malformed store blob");
                return None;
            }
        };
        let state = blob.get("state")?;
        ["token", "accessToken"]
            .iter()
            .filter_map(|field| state.get(field).and_then(Value::as_str))
            .find_map(AuthToken::new)
    }
}
