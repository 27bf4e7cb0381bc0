//! Game Connection Port - outbound port for the session socket
//!
//! The session store only needs to know whether the link is up and to hand
//! over envelopes; connecting and reconnecting stay with the connection
//! manager.

use tavern_domain::ConnectionStatus;
use tavern_protocol::Envelope;
use thiserror::Error;

/// Why an envelope was not handed to the transport
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    /// Command attempted while the connection is not `Connected`
    #[error("cannot send while {state}")]
    SendWhileDisconnected { state: ConnectionStatus },

    #[error("failed to encode envelope: {0}")]
    Serialize(String),

    /// Writer is backed up; the frame was not queued
    #[error("outbound queue is full")]
    QueueFull,
}

/// NOTE: object-safe so the session store can hold an
/// `Arc<dyn GameConnectionPort>` without knowing the transport.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait GameConnectionPort: Send + Sync {
    /// Current connection status
    fn status(&self) -> ConnectionStatus;

    /// Queue an envelope for the writer.
    ///
    /// Never blocks and never panics; fails unless the status is `Connected`.
    fn send(&self, envelope: Envelope) -> Result<(), SendError>;
}
