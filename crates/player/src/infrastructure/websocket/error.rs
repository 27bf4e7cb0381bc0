//! Connection errors

use thiserror::Error;

/// Category of a connection failure, carried by lifecycle `Error` events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AuthMissing,
    AuthRejected,
    ConnectivityProbeFailed,
    Transport,
    InvalidEndpoint,
    ConnectInProgress,
    Cancelled,
    ReconnectExhausted,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    /// No token could be resolved
    #[error("no authentication token available")]
    AuthMissing,

    /// Server refused the token (handshake 401/403 or close code 1008)
    #[error("server rejected credentials: {0}")]
    AuthRejected(String),

    /// Pre-flight probe failed or timed out
    #[error("connectivity probe to {url} failed: {reason}")]
    ConnectivityProbeFailed { url: String, reason: String },

    /// Handshake failure, socket error or abnormal close
    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// `connect()` while another attempt is in flight
    #[error("a connection attempt is already in progress")]
    ConnectInProgress,

    /// `disconnect()` was called while the attempt was in flight
    #[error("connection attempt was cancelled")]
    Cancelled,
}

impl ConnectionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AuthMissing => ErrorKind::AuthMissing,
            Self::AuthRejected(_) => ErrorKind::AuthRejected,
            Self::ConnectivityProbeFailed { .. } => ErrorKind::ConnectivityProbeFailed,
            Self::Transport(_) => ErrorKind::Transport,
            Self::InvalidEndpoint(_) => ErrorKind::InvalidEndpoint,
            Self::ConnectInProgress => ErrorKind::ConnectInProgress,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Failures that retrying cannot fix
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AuthMissing | Self::AuthRejected(_) | Self::InvalidEndpoint(_)
        )
    }
}

impl From<url::ParseError> for ConnectionError {
    fn from(e: url::ParseError) -> Self {
        Self::InvalidEndpoint(e.to_string())
    }
}
