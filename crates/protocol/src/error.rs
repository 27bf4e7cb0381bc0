//! Protocol decode errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame is not a JSON envelope
    #[error("Malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Envelope type is not part of the inbound vocabulary
    #[error("Unknown message type: {0}")]
    UnknownType(String),

    /// Known type whose data does not match the expected payload
    #[error("Invalid {kind} payload: {source}")]
    InvalidPayload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}
